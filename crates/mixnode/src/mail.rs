// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The email value type and the outbound transport seam.
//!
//! The node only needs a small slice of RFC 822: ordered headers, a flat
//! text body, and enough parsing to read back what it wrote to the pool
//! and what the maildir hands it. Anything fancier lives with the mail
//! system around the node.

use std::fmt;

/// An email as the node sees it: ordered headers plus body.
#[derive(Clone, Default)]
pub struct Email {
    headers: Vec<(String, String)>,
    body: String,
}

impl Email {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of a header, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first occurrence of a header, or append it.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for (n, v) in &mut self.headers {
            if n.eq_ignore_ascii_case(name) {
                *v = value;
                return;
            }
        }
        self.headers.push((name.to_string(), value));
    }

    /// Append a header occurrence unconditionally.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    /// True when the message declares a multipart body; the node rejects
    /// those outright.
    pub fn is_multipart(&self) -> bool {
        self.get("Content-Type")
            .map(|ct| ct.to_ascii_lowercase().contains("multipart/"))
            .unwrap_or(false)
    }

    /// The address part of the `From` header, lower-cased.
    pub fn from_addr(&self) -> Option<String> {
        self.get("From").map(|raw| {
            let raw = raw.trim();
            match (raw.rfind('<'), raw.rfind('>')) {
                (Some(a), Some(b)) if a < b => raw[a + 1..b].trim().to_ascii_lowercase(),
                _ => raw.to_ascii_lowercase(),
            }
        })
    }

    /// Parse a serialized message: headers to the first blank line (with
    /// folded continuations), body after it.
    pub fn parse(text: &str) -> Self {
        let mut email = Self::new();
        let mut lines = text.lines();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, v)) = email.headers.last_mut() {
                    v.push(' ');
                    v.push_str(line.trim());
                }
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => email.add(name.trim(), value.trim()),
                // A headerless junk line; keep going, the armor scan will
                // reject the message if it matters.
                None => continue,
            }
        }
        let body: Vec<&str> = lines.collect();
        email.body = body.join("\n");
        if !email.body.is_empty() {
            email.body.push('\n');
        }
        email
    }

    /// Serialize for the pool, the maildir, or the SMTP DATA phase.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }
}

/// How an SMTP hand-off failed, which decides the pool's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// Could not reach or keep the server; the whole tick aborts.
    Connection,
    /// 4xx class refusal; the message stays pooled for the next tick.
    Transient,
    /// 5xx class rejection; the message is logged and discarded.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct SendError {
    pub kind: SendErrorKind,
    pub detail: String,
}

impl SendError {
    pub fn connection(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Connection,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Transient,
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Fatal,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SendErrorKind::Connection => "connection",
            SendErrorKind::Transient => "transient",
            SendErrorKind::Fatal => "fatal",
        };
        write!(f, "{}: {}", kind, self.detail)
    }
}

impl std::error::Error for SendError {}

/// The outbound mail seam. The daemon provides an SMTP client; tests
/// provide scripted doubles.
pub trait Mailer {
    fn sendmail(&mut self, from: &str, to: &str, message: &str) -> Result<(), SendError>;
}

/// A fresh `Message-ID` value.
pub fn msgid(domain: &str) -> String {
    let token = hex::encode(crate::crypto::random_array::<8>());
    format!("<{}.mix@{}>", token, domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parse_roundtrip() {
        let mut email = Email::new();
        email.add("To", "alice@example");
        email.add("Subject", "hello");
        email.set_body("line one\nline two\n");

        let text = email.render();
        let back = Email::parse(&text);
        assert_eq!(back.get("To"), Some("alice@example"));
        assert_eq!(back.get("subject"), Some("hello"));
        assert_eq!(back.body(), "line one\nline two\n");
    }

    #[test]
    fn test_folded_header() {
        let email = Email::parse("Subject: a very\n\tlong subject\n\nbody\n");
        assert_eq!(email.get("Subject"), Some("a very long subject"));
    }

    #[test]
    fn test_from_addr_extraction() {
        let email = Email::parse("From: Mailer Daemon <MAILER-DAEMON@host>\n\n");
        assert_eq!(email.from_addr().unwrap(), "mailer-daemon@host");
        let bare = Email::parse("From: someone@host\n\n");
        assert_eq!(bare.from_addr().unwrap(), "someone@host");
    }

    #[test]
    fn test_multipart_detection() {
        let email = Email::parse("Content-Type: multipart/mixed; boundary=x\n\n");
        assert!(email.is_multipart());
        let plain = Email::parse("Content-Type: text/plain\n\n");
        assert!(!plain.is_multipart());
    }

    #[test]
    fn test_set_replaces() {
        let mut email = Email::new();
        email.add("To", "a@example");
        email.set("To", "b@example");
        assert_eq!(email.get("To"), Some("b@example"));
        assert_eq!(email.render().matches("To:").count(), 1);
    }

    #[test]
    fn test_msgid_shape() {
        let id = msgid("node.example");
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@node.example>"));
    }
}
