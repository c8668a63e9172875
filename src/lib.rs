/*
 *  lib.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

pub mod config;
pub mod decode;
pub mod detector;
pub mod deutils;
pub mod func_timer;
pub mod logging;
pub mod metadata;
pub mod render;
pub mod retry;
pub mod server;
pub mod sync;
pub mod transport;

pub use config::{Config, RenderSettings, ServerSettings, SyncSettings};
pub use metadata::{ArtworkValidator, TrackMetadata};
pub use sync::{CycleOutcome, SyncController};
pub use transport::{HttpTransport, Transport, TransportFault};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Resolves on SIGINT, SIGTERM or SIGHUP.
pub async fn signal_handler() -> std::io::Result<()> {
    use log::info;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}
