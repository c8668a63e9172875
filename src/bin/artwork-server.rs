/*
 *  bin/artwork-server.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	Serves metadata.json and the artwork bitmaps to the display
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

use anyhow::Context;
use log::{error, info};

use artsync::{config, logging, server, signal_handler, BUILD_DATE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load()?;
    logging::init(config.log_level(), config.log_file.as_deref());

    info!("{} artwork server v.{} built {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let settings = config.server_settings();
    let bind = settings.bind.clone();
    let shutdown = async {
        if let Err(e) = signal_handler().await {
            error!("Cannot install signal handlers: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down server...");
    };

    server::serve(settings, shutdown)
        .await
        .with_context(|| format!("artwork server on {} failed", bind))?;
    Ok(())
}
