// Copyright 2026 createusb Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
