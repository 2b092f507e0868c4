// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon pieces around the mixnode core: maildir ingestion, the SMTP
//! client, and the `remailer-*` responders.

pub mod mailbox;
pub mod responder;
pub mod smtp;

pub use mailbox::{Mailbox, PassCounters};
pub use smtp::SmtpClient;
