// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The remailer daemon.
//!
//! One foreground loop: prune the stores, drain the maildir through the
//! decode pipeline, give the pool a tick, sleep. An interrupt finishes
//! the pass in flight, flushes the stores and exits.
//!
//! ```bash
//! # First run: create a key pair and the published key file
//! mixnode-daemon --config mixnode.json --generate-key
//!
//! # Serve
//! mixnode-daemon --config mixnode.json
//! ```

use anyhow::Context;
use clap::Parser;
use mixnode::{keys, Config, MixNode};
use mixnode_daemon::{Mailbox, SmtpClient};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// mixnode - a Type-II (Mixmaster) anonymous remailer node
#[derive(Parser, Debug)]
#[command(name = "mixnode-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "mixnode.json")]
    config: PathBuf,

    /// Log level override (debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Generate a key pair, update the rings, and exit
    #[arg(long)]
    generate_key: bool,

    /// Key lifetime in days for --generate-key
    #[arg(long, default_value = "365")]
    key_lifetime: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if args.config.is_file() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };

    let level = match args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
    {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("installing the tracing subscriber")?;

    if args.generate_key {
        let id = keys::keygen::generate(
            &config.keys.secring,
            &config.keys.pubkey,
            &config.general.shortname,
            &config.mail.address,
            "3.0",
            "C",
            args.key_lifetime,
        )
        .context("generating a key pair")?;
        println!("generated key {}", id);
        println!("secret ring:   {}", config.keys.secring);
        println!("published key: {}", config.keys.pubkey);
        return Ok(());
    }

    info!(
        "mixnode {} starting as {} <{}>",
        env!("CARGO_PKG_VERSION"),
        config.general.shortname,
        config.mail.address
    );

    let sleep = config.loop_interval();
    let mailbox = Mailbox::open(&config.paths.maildir)
        .with_context(|| format!("opening maildir {}", config.paths.maildir))?;
    let mut smtp = SmtpClient::new(
        &config.mail.server,
        config.mail.port,
        &config.general.shortname,
    );
    let node = MixNode::open(config).context("bringing the node up")?;

    loop {
        if let Err(e) = node.housekeeping() {
            warn!("housekeeping failed: {}", e);
        }
        mailbox.iterate(&node, &mut smtp);
        match node.tick(&mut smtp) {
            Ok(report) if report.dispatched > 0 || report.failed > 0 => {
                info!(
                    "pool tick: {} sent, {} failed",
                    report.dispatched, report.failed
                );
            }
            Ok(_) => {}
            Err(e) => warn!("pool tick aborted: {}", e),
        }
        smtp.quit();

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    node.shutdown().context("flushing stores at shutdown")?;
    smtp.quit();
    Ok(())
}
