// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use clap_derive::Parser;
use serde_derive::{Deserialize, Serialize};
use switchboard_registry::RegistryConfig;

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct Args {
    #[arg(
        long,
        value_name = "listen-address",
        help = "HTTP and WebSocket listen address",
        default_value = "0.0.0.0:8080"
    )]
    pub listen_address: String,

    #[arg(
        long,
        value_name = "store-url",
        help = "Shared store URL, redis://[password@]host[:port][/db]",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub store_url: String,

    #[arg(
        long,
        help = "Fixed server id for this node; generated at startup if not given"
    )]
    pub server_id: Option<String>,

    #[arg(
        long,
        help = "Cluster-wide maximum number of connections",
        default_value = "1000"
    )]
    pub max_connections: usize,

    #[arg(
        long,
        help = "Prefix for every key written to the shared store",
        default_value = "switchboard"
    )]
    pub key_prefix: String,

    #[arg(long, help = "Seconds between ping rounds", default_value = "30")]
    pub ping_interval: u64,

    #[arg(
        long,
        help = "Seconds between unresponsive-connection sweeps",
        default_value = "300"
    )]
    pub cleanup_interval: u64,

    #[arg(
        long,
        help = "Seconds a ping may go unanswered before the connection is reclaimed",
        default_value = "60"
    )]
    pub ping_timeout: u64,

    #[arg(
        long,
        help = "Seconds without activity before a connection is reclaimed",
        default_value = "900"
    )]
    pub stale_timeout: u64,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,

    #[arg(long, help = "Yaml config file to use, overrides values in CLI args")]
    pub config_file: Option<String>,
}

impl Args {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            server_id: self.server_id.clone(),
            max_connections: self.max_connections,
            key_prefix: self.key_prefix.clone(),
            ping_interval: self.ping_interval,
            cleanup_check_interval: self.cleanup_interval,
            ping_timeout: self.ping_timeout,
            stale_timeout: self.stale_timeout,
        }
    }
}
