// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Mailbox pass behavior: inbound policy, request responses, and packet
// hand-off, driven through a real maildir in a temp directory.

use mixnode::keys::{keygen, PublicKeyStore};
use mixnode::{Config, Email, Encoder, Mailer, MixNode, SendError};
use mixnode_daemon::Mailbox;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Default)]
struct RecordingMailer {
    sent: Vec<(String, String)>,
}

impl Mailer for RecordingMailer {
    fn sendmail(&mut self, _from: &str, to: &str, message: &str) -> Result<(), SendError> {
        self.sent.push((to.to_string(), message.to_string()));
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    node: MixNode,
    mailbox: Mailbox,
    pubring: Arc<PublicKeyStore>,
    maildir_new: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().to_path_buf();
    keygen::generate(
        home.join("secring.mix"),
        home.join("key.txt"),
        "testnode",
        "mix@testnode.example",
        "3.0",
        "C",
        365,
    )
    .unwrap();
    // The node's own key doubles as the only peer.
    fs::copy(home.join("key.txt"), home.join("pubring.mix")).unwrap();

    let path = |name: &str| home.join(name).display().to_string();
    let mut config = Config::default();
    config.general.shortname = "testnode".to_string();
    config.mail.address = "mix@testnode.example".to_string();
    config.keys.secring = path("secring.mix");
    config.keys.pubring = path("pubring.mix");
    config.keys.pubkey = path("key.txt");
    config.paths.pool = path("pool");
    config.paths.idlog = path("idlog.bin");
    config.paths.chunks = path("chunks");
    config.paths.maildir = path("Maildir");
    config.pool.size = 1;
    config.pool.rate = 100;
    config.pool.outdummy = 0;

    let maildir_new = home.join("Maildir/new");
    let pubring = Arc::new(PublicKeyStore::open(home.join("pubring.mix")).unwrap());
    let mailbox = Mailbox::open(home.join("Maildir")).unwrap();
    let node = MixNode::open(config).unwrap();
    Fixture {
        _dir: dir,
        node,
        mailbox,
        pubring,
        maildir_new,
    }
}

fn drop_mail(dir: &Path, name: &str, email: &Email) {
    fs::write(dir.join(name), email.render()).unwrap();
}

#[test]
fn bounce_and_multipart_are_dropped() {
    let fx = fixture();

    let mut bounce = Email::new();
    bounce.add("From", "MAILER-DAEMON@somewhere.example");
    bounce.add("To", "mix@testnode.example");
    bounce.set_body("undeliverable\n");
    drop_mail(&fx.maildir_new, "msg1", &bounce);

    let mut multipart = Email::new();
    multipart.add("From", "someone@example");
    multipart.add("Content-Type", "multipart/mixed; boundary=xyz");
    multipart.set_body("--xyz\n");
    drop_mail(&fx.maildir_new, "msg2", &multipart);

    let mut mailer = RecordingMailer::default();
    let counters = fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(counters.processed, 2);
    assert_eq!(counters.failed, 2);
    assert!(mailer.sent.is_empty());
    // Consumed either way.
    assert_eq!(fs::read_dir(&fx.maildir_new).unwrap().count(), 0);
}

#[test]
fn remailer_key_request_gets_reply() {
    let fx = fixture();

    let mut req = Email::new();
    req.add("From", "curious@example");
    req.add("Subject", "remailer-key");
    drop_mail(&fx.maildir_new, "msg1", &req);

    let mut mailer = RecordingMailer::default();
    let counters = fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(counters.responded, 1);
    assert_eq!(mailer.sent.len(), 1);

    let (to, message) = &mailer.sent[0];
    assert_eq!(to, "curious@example");
    assert!(message.contains("Subject: Remailer key for testnode"));
    assert!(message.contains("$remailer{\"testnode\"}"));
    assert!(message.contains("-----Begin Mix Key-----"));
}

#[test]
fn reply_to_overrides_response_address() {
    let fx = fixture();

    let mut req = Email::new();
    req.add("From", "original@example");
    req.add("Reply-To", "elsewhere@example");
    req.add("Subject", "remailer-conf");
    drop_mail(&fx.maildir_new, "msg1", &req);

    let mut mailer = RecordingMailer::default();
    fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(mailer.sent[0].0, "elsewhere@example");
    assert!(mailer.sent[0].1.contains("SUPPORTED MIXMASTER (TYPE II) REMAILERS"));
}

#[test]
fn packet_in_maildir_reaches_the_pool() {
    let fx = fixture();

    let encoder = Encoder::new(fx.pubring.clone(), "Mixmaster test", 100);
    let mut msg = Email::new();
    msg.add("To", "alice@example");
    msg.set_body("through the maildir\n");
    let emails = encoder
        .encode_message(&msg, &["testnode".to_string()])
        .unwrap();
    drop_mail(&fx.maildir_new, "msg1", &emails[0]);

    let mut mailer = RecordingMailer::default();
    let counters = fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(counters.pooled, 1);
    assert_eq!(fx.node.pool().count().unwrap(), 1);

    fx.node.pool().trigger();
    fx.node.tick(&mut mailer).unwrap();
    assert_eq!(mailer.sent.len(), 1);
    assert_eq!(mailer.sent[0].0, "alice@example");
}

#[test]
fn request_without_response_address_falls_through() {
    let fx = fixture();

    // A request subject but no From or Reply-To: nowhere to answer, so
    // the message continues into the packet pipeline and fails there.
    let mut req = Email::new();
    req.add("Subject", "remailer-key");
    req.set_body("who am I talking to\n");
    drop_mail(&fx.maildir_new, "msg1", &req);

    let mut mailer = RecordingMailer::default();
    let counters = fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(counters.responded, 0);
    assert_eq!(counters.failed, 1);
    assert!(mailer.sent.is_empty());
}

#[test]
fn junk_message_is_counted_failed_and_consumed() {
    let fx = fixture();

    let mut junk = Email::new();
    junk.add("From", "someone@example");
    junk.set_body("this is not a remailer packet\n");
    drop_mail(&fx.maildir_new, "msg1", &junk);

    let mut mailer = RecordingMailer::default();
    let counters = fx.mailbox.iterate(&fx.node, &mut mailer);
    assert_eq!(counters.failed, 1);
    assert_eq!(fs::read_dir(&fx.maildir_new).unwrap().count(), 0);
    assert!(mailer.sent.is_empty());
}
