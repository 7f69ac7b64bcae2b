/*
 * This file is part of Devgate.
 *
 * Copyright (C) 2025 Devgate contributors
 *
 * Devgate is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Devgate is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Devgate. If not, see <https://www.gnu.org/licenses/>.
 */

//! Devgate - USB device control agent for Linux
//!
//! This library wires the `dg-core` pipeline into a running agent: command
//! line handling, agent configuration, the JSON event log and the
//! start/supervise/stop lifecycle.

pub mod cli;
pub mod config;
pub mod logger;
pub mod service;
