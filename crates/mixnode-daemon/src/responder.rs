// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The `remailer-*` operator interface.
//!
//! Plain-subject requests get canned replies: the published key, the
//! capability listing, help text, the admin PGP key, basic stats. A
//! `Reply-To` header overrides the response address; with neither
//! `Reply-To` nor `From` there is nowhere to answer and the message
//! falls through to the packet pipeline instead.

use mixnode::{Email, Mailer, MixNode, SendError};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Answer a request message if its subject names one. Returns `false`
/// when the message is not a request and should continue into the packet
/// pipeline.
pub fn respond(
    node: &MixNode,
    inbound: &Email,
    mailer: &mut dyn Mailer,
) -> Result<bool, SendError> {
    let Some(subject) = inbound.get("Subject") else {
        return Ok(false);
    };
    let reply_to = inbound
        .get("Reply-To")
        .or_else(|| inbound.get("From"))
        .map(str::to_string);

    let config = node.config();
    let short = &config.general.shortname;
    let (subject, body) = match subject.trim().to_ascii_lowercase().as_str() {
        "remailer-key" => (
            format!("Remailer key for {}", short),
            key_body(node),
        ),
        "remailer-conf" => (
            format!("Capabilities of the {} remailer", short),
            conf_body(node),
        ),
        "remailer-help" => (
            format!("Help info for the {} remailer", short),
            file_or(&config.paths.helpfile, "No help information available\n"),
        ),
        "remailer-adminkey" => (
            format!("Admin PGP Key for the {} Remailer", short),
            file_or(&config.paths.adminkey, "No adminkey available\n"),
        ),
        "remailer-stats" => (
            format!("Stats for the {} remailer", short),
            stats_body(node),
        ),
        _ => return Ok(false),
    };

    let Some(to) = reply_to else {
        // Nowhere to answer; give up on the request and let the message
        // fall through to the packet pipeline.
        debug!("request without a response address");
        return Ok(false);
    };

    let mut reply = Email::new();
    reply.add("From", format!("{} <{}>", config.general.longname, config.mail.address));
    reply.add("To", to.clone());
    reply.add("Subject", subject);
    let domain = config.mail.address.split('@').nth(1).unwrap_or("localhost");
    reply.add("Message-ID", mixnode::mail::msgid(domain));
    reply.add("Date", chrono::Utc::now().to_rfc2822());
    reply.set_body(body);

    mailer.sendmail(&config.mail.address, &to, &reply.render())?;
    info!("answered {} for {}", reply.get("Subject").unwrap_or("?"), to);
    Ok(true)
}

fn key_body(node: &MixNode) -> String {
    let mut body = format!("{}\n\n", node.capabilities_text());
    body.push_str("Here is the Mixmaster key:\n\n");
    body.push_str("=-=-=-=-=-=-=-=-=-=-=-=\n");
    match node.public_key_armor() {
        Ok(armor) => body.push_str(&armor),
        Err(_) => body.push_str("No key is currently published.\n"),
    }
    body
}

fn conf_body(node: &MixNode) -> String {
    let config = node.config();
    let mut body = format!("Remailer-Type: {}\n", config.general.version);
    body.push_str("Supported format: Mixmaster\n");
    body.push_str(&format!("Pool size: {}\n", config.pool.size));
    body.push_str(&format!(
        "Maximum message size: {} kB\n",
        config.general.klen
    ));
    if !config.general.dest_block.is_empty() {
        body.push_str("The following destinations are blocked:\n");
        for pat in &config.general.dest_block {
            body.push_str(&format!("  {}\n", pat));
        }
    }
    body.push_str(&format!("\n{}\n\n", node.capabilities_text()));
    body.push_str("SUPPORTED MIXMASTER (TYPE II) REMAILERS\n");
    for header in node.peer_header_list() {
        body.push_str(&header);
        body.push('\n');
    }
    body
}

fn stats_body(node: &MixNode) -> String {
    let pooled = node.pool().count().unwrap_or(0);
    let mut body = format!("Statistics for this {} remailer:\n", node.config().general.shortname);
    body.push_str(&format!("Messages currently pooled: {}\n", pooled));
    body.push_str(&format!("Known remailers: {}\n", node.peer_header_list().len()));
    body
}

fn file_or(path: &str, fallback: &str) -> String {
    if Path::new(path).is_file() {
        fs::read_to_string(path).unwrap_or_else(|_| fallback.to_string())
    } else {
        fallback.to_string()
    }
}
