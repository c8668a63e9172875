/*
 *  main.rs
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

use anyhow::Context;
use log::{error, info};

use artsync::render::{open_sink, RenderSink};
use artsync::{config, logging, signal_handler, HttpTransport, SyncController, BUILD_DATE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load()?;
    logging::init(config.log_level(), config.log_file.as_deref());

    info!("This {} worth the Squeeze", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let sync = config.sync_settings();
    let render = config.render_settings();
    info!("Metadata URL: {}", sync.metadata_url);
    info!("Artwork URL: {}", sync.artwork_url);
    info!(
        "Poll every {}s, force refresh after {}s, timeouts {}s/{}s, {} attempts",
        sync.poll_interval.as_secs(),
        sync.force_refresh.as_secs(),
        sync.http_timeout.as_secs(),
        sync.download_timeout.as_secs(),
        sync.max_retries
    );

    let sink = open_sink(&render).with_context(|| format!("cannot open {:?} render sink", render.sink))?;
    info!("Render sink: {}", sink.describe());

    let transport = HttpTransport::new(sync.transport_settings()).context("cannot create HTTP transport")?;
    let poll_interval = sync.poll_interval;
    let mut controller = SyncController::new(transport, sink, sync);

    if render.status_pattern {
        controller.show_status_pattern((render.width, render.height), render.pattern_square);
    }

    let shutdown = async {
        if let Err(e) = signal_handler().await {
            // without signals we simply run until killed
            error!("Cannot install signal handlers: {}", e);
            std::future::pending::<()>().await;
        }
    };
    controller.run(poll_interval, shutdown).await;

    let stats = controller.state().stats;
    info!(
        "Exiting: {} cycles, {} updates, {} failures, {} pool resets",
        stats.cycles,
        stats.updates,
        stats.failures,
        controller.transport().resets()
    );
    Ok(())
}
