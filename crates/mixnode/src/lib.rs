// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core library of the mixnode Type-II remailer.
//!
//! Everything here is synchronous and transport-free: the daemon crate
//! supplies the mail loop, the SMTP client and the operator surface. The
//! seams are `mail::Mailer` for outbound transport and `mail::Email` for
//! message bodies in either direction.
//!
//! # Layout
//!
//! - [`packet`] -- the fixed 20,480-byte wire format and its armor
//! - [`crypto`] -- the RSA/3DES/MD5 primitives the format is built on
//! - [`keys`] -- wire codec, secret and public rings, chain selection
//! - [`decoder`] / [`encoder`] -- the two pipelines
//! - [`replay`], [`chunk`], [`pool`] -- the persistent stores
//! - [`node`] -- the orchestrator the daemon drives

pub mod chunk;
pub mod config;
pub mod crypto;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod keys;
pub mod mail;
pub mod node;
pub mod packet;
pub mod pool;
pub mod replay;
pub mod timing;

pub use config::Config;
pub use decoder::{Decoder, Outcome};
pub use encoder::Encoder;
pub use error::MixError;
pub use mail::{Email, Mailer, SendError, SendErrorKind};
pub use node::{Disposition, MixNode};
pub use packet::Packet;
