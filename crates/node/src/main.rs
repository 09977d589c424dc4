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

mod args;
mod routes;
mod ws_connection;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use switchboard_common::SystemClock;
use switchboard_registry::{ConnectionManager, RespStore};
use tokio::{
    net::TcpListener,
    select,
    signal::unix::{SignalKind, signal},
};
use tracing::{error, info};

use crate::args::Args;
use crate::routes::{NodeState, mk_routes};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let cli_args = Args::parse();
    let config_file = cli_args.config_file.clone();
    let mut args_figment = Figment::new().merge(Serialized::defaults(cli_args));
    if let Some(config_file) = config_file {
        args_figment = args_figment.merge(Yaml::file(config_file));
    }
    let args = args_figment.extract::<Args>()?;

    switchboard_common::tracing::init_tracing(args.debug).unwrap_or_else(|e| {
        eprintln!("Unable to configure logging: {e}");
        std::process::exit(1);
    });

    let mut hup_signal = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(e) => {
            error!("Unable to register HUP signal handler: {}", e);
            std::process::exit(1);
        }
    };
    let mut stop_signal = match signal(SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(e) => {
            error!("Unable to register STOP signal handler: {}", e);
            std::process::exit(1);
        }
    };
    let mut term_signal = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            error!("Unable to register TERM signal handler: {}", e);
            std::process::exit(1);
        }
    };

    let store = match RespStore::connect(&args.store_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(store_url = %args.store_url, "Unable to reach shared store: {}", e);
            std::process::exit(1);
        }
    };

    let manager = ConnectionManager::new(
        args.registry_config(),
        Arc::new(store),
        Arc::new(SystemClock),
    )?;
    manager.start_ping_service(Duration::from_secs(args.ping_interval))?;
    manager.start_cleanup_services(
        Duration::from_secs(args.cleanup_interval),
        Duration::from_secs(args.stale_timeout),
    )?;

    let listen_address: SocketAddr = match args.listen_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(
                "Unable to parse listen address {}: {}",
                args.listen_address, e
            );
            std::process::exit(1);
        }
    };
    let listener = TcpListener::bind(listen_address).await?;
    info!(server_id = %manager.server_id(), "Listening on {:?}", listener.local_addr()?);

    let router = mk_routes(NodeState::new(manager.clone()));
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        result = server => {
            if let Err(e) = result {
                error!("Listener exited with error: {}", e);
            } else {
                info!("Listener exited.");
            }
        }
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
        }
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
        }
        _ = term_signal.recv() => {
            info!("TERM received, stopping...");
        }
    }

    if let Err(e) = manager.shutdown().await {
        error!("Connection manager did not shut down cleanly: {}", e);
    }
    info!("Done.");

    Ok(())
}
