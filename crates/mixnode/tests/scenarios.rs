// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// End-to-end scenarios over real key rings in temp directories: encode
// with the public pipeline, decode with freshly-opened nodes, dispatch
// through a scripted mailer.

use mixnode::keys::{keygen, PublicKeyStore};
use mixnode::packet::{
    armor_packet, FinalPayload, HopInfo, InnerHeader, OuterHeader, Packet, INNER_LEN,
    RSA_BLOCK_LEN, REST_STACK_LEN,
};
use mixnode::{crypto, Config, Disposition, Email, Encoder, MixError, MixNode, Mailer, SendError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Records every send; never fails.
#[derive(Default)]
struct RecordingMailer {
    sent: Vec<(String, String)>,
}

impl Mailer for RecordingMailer {
    fn sendmail(&mut self, from: &str, to: &str, message: &str) -> Result<(), SendError> {
        self.sent.push((to.to_string(), message.to_string()));
        let _ = from;
        Ok(())
    }
}

struct TestNet {
    _dir: tempfile::TempDir,
    nodes: Vec<MixNode>,
    pubring: Arc<PublicKeyStore>,
    configs: Vec<Config>,
}

impl TestNet {
    /// `n` remailers sharing one pubring, each with its own stores.
    fn build(n: usize, tweak: impl Fn(&mut Config, usize)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut pubring_text = String::new();
        for i in 0..n {
            let home = dir.path().join(format!("node{}", i));
            keygen::generate(
                home.join("secring.mix"),
                home.join("key.txt"),
                &format!("node{}", i),
                &format!("mix@node{}.example", i),
                "3.0",
                "C",
                365,
            )
            .unwrap();
            pubring_text.push_str(&fs::read_to_string(home.join("key.txt")).unwrap());
            pubring_text.push('\n');
        }
        let pubring_path = dir.path().join("pubring.mix");
        fs::write(&pubring_path, &pubring_text).unwrap();

        let mut nodes = Vec::new();
        let mut configs = Vec::new();
        for i in 0..n {
            let home = dir.path().join(format!("node{}", i));
            let path = |name: &str| home.join(name).display().to_string();
            let mut config = Config::default();
            config.general.shortname = format!("node{}", i);
            config.mail.address = format!("mix@node{}.example", i);
            config.keys.secring = path("secring.mix");
            config.keys.pubring = pubring_path.display().to_string();
            config.keys.pubkey = path("key.txt");
            config.paths.pool = path("pool");
            config.paths.idlog = path("idlog.bin");
            config.paths.chunks = path("chunks");
            config.paths.maildir = path("Maildir");
            config.pool.size = 1;
            config.pool.rate = 100;
            config.pool.outdummy = 0;
            tweak(&mut config, i);
            configs.push(config.clone());
            nodes.push(MixNode::open(config).unwrap());
        }
        let pubring = Arc::new(PublicKeyStore::open(&pubring_path).unwrap());
        Self {
            _dir: dir,
            nodes,
            pubring,
            configs,
        }
    }

    fn encoder(&self) -> Encoder {
        Encoder::new(self.pubring.clone(), "Mixmaster test", 100)
    }

    fn idlog_entries(&self, i: usize) -> u64 {
        fs::metadata(&self.configs[i].paths.idlog)
            .map(|m| m.len() / 18)
            .unwrap_or(0)
    }

    /// The single message currently in node `i`'s pool.
    fn pooled_email(&self, i: usize) -> Email {
        let dir = PathBuf::from(&self.configs[i].paths.pool);
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        assert_eq!(files.len(), 1, "expected exactly one pooled message");
        Email::parse(&fs::read_to_string(files.remove(0)).unwrap())
    }
}

fn plain_message(to: &str, body: &str) -> Email {
    let mut msg = Email::new();
    msg.add("To", to);
    msg.add("Subject", "test delivery");
    msg.set_body(body);
    msg
}

#[test]
fn single_hop_deliver() {
    let net = TestNet::build(1, |_, _| {});
    let emails = net
        .encoder()
        .encode_message(
            &plain_message("alice@example", "hello through the mix\n"),
            &["node0".to_string()],
        )
        .unwrap();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].get("To"), Some("mix@node0.example"));

    match net.nodes[0].process_mail(&emails[0]).unwrap() {
        Disposition::Pooled(1) => {}
        _ => panic!("expected one pooled delivery"),
    }
    assert_eq!(net.idlog_entries(0), 1);

    net.nodes[0].pool().trigger();
    let mut mailer = RecordingMailer::default();
    let report = net.nodes[0].tick(&mut mailer).unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(net.nodes[0].pool().count().unwrap(), 0);

    let (to, message) = &mailer.sent[0];
    assert_eq!(to, "alice@example");
    assert!(message.contains("Subject: test delivery"));
    assert!(message.contains("hello through the mix"));
}

#[test]
fn two_hop_forward() {
    let net = TestNet::build(2, |_, _| {});
    let emails = net
        .encoder()
        .encode_message(
            &plain_message("bob@example", "two hops away\n"),
            &["node0".to_string(), "node1".to_string()],
        )
        .unwrap();

    // Hop one: node0 peels its layer and pools a full-size packet for
    // node1.
    match net.nodes[0].process_mail(&emails[0]).unwrap() {
        Disposition::Pooled(1) => {}
        _ => panic!("expected a forwarded packet"),
    }
    let forwarded = net.pooled_email(0);
    assert_eq!(forwarded.get("To"), Some("mix@node1.example"));
    let packet = mixnode::packet::dearmor(forwarded.body()).unwrap();
    assert_eq!(packet.len(), 20_480);

    // Hop two: node1 is the exit.
    match net.nodes[1].process_mail(&forwarded).unwrap() {
        Disposition::Pooled(1) => {}
        _ => panic!("expected a delivery at the exit"),
    }
    net.nodes[1].pool().trigger();
    let mut mailer = RecordingMailer::default();
    net.nodes[1].tick(&mut mailer).unwrap();
    assert_eq!(mailer.sent.len(), 1);
    assert_eq!(mailer.sent[0].0, "bob@example");
    assert!(mailer.sent[0].1.contains("two hops away"));
}

#[test]
fn replay_is_silently_dropped() {
    let net = TestNet::build(1, |_, _| {});
    let emails = net
        .encoder()
        .encode_message(
            &plain_message("alice@example", "once only\n"),
            &["node0".to_string()],
        )
        .unwrap();

    assert!(net.nodes[0].process_mail(&emails[0]).is_ok());
    match net.nodes[0].process_mail(&emails[0]) {
        Err(MixError::Replay) => {}
        other => panic!("expected Replay, got ok={}", other.is_ok()),
    }

    // Exactly one send despite two decode attempts.
    net.nodes[0].pool().trigger();
    let mut mailer = RecordingMailer::default();
    net.nodes[0].tick(&mut mailer).unwrap();
    assert_eq!(mailer.sent.len(), 1);
}

/// Build a Type-1 packet by hand so the timestamp can be forged.
fn handmade_packet(
    pubring: &PublicKeyStore,
    name: &str,
    packet_id: [u8; 16],
    epoch_days: u16,
) -> Email {
    let peer = pubring.by_name(name).unwrap();
    let iv = crypto::random_array::<8>();
    let mut inner = InnerHeader::fresh(HopInfo::Final {
        message_id: crypto::random_array::<16>(),
        iv,
    });
    inner.packet_id = packet_id;
    inner.epoch_days = epoch_days;

    let block = FinalPayload {
        recipients: vec!["alice@example".to_string()],
        headers: vec![],
        body: b"timestamp test\n".to_vec(),
    }
    .encode_padded()
    .unwrap();
    let enc_payload = crypto::des3_encrypt(&inner.body_key, &iv, &block).unwrap();

    let session = crypto::random_array::<24>();
    let outer_iv = crypto::random_array::<8>();
    let inner_ct_vec = crypto::des3_encrypt(&session, &outer_iv, &inner.encode()).unwrap();
    let mut inner_ct = [0u8; INNER_LEN];
    inner_ct.copy_from_slice(&inner_ct_vec);
    let rsa_ct_vec = crypto::rsa_wrap(&peer.key, &session).unwrap();
    let mut rsa_ct = [0u8; RSA_BLOCK_LEN];
    rsa_ct.copy_from_slice(&rsa_ct_vec);

    let slot0 = OuterHeader {
        key_id: peer.key_id,
        rsa_ct,
        iv: outer_iv,
        inner_ct,
    }
    .encode();
    let packet = Packet::from_parts(&slot0, &crypto::random_vec(REST_STACK_LEN), &enc_payload)
        .unwrap();

    let mut email = Email::new();
    email.add("To", peer.email);
    email.set_body(armor_packet(packet.as_bytes(), "Mixmaster test"));
    email
}

#[test]
fn stale_packet_rejected_without_replay_insert() {
    let net = TestNet::build(1, |_, _| {});
    let packet_id = crypto::random_array::<16>();

    // Epoch-day zero is far outside any window.
    let stale = handmade_packet(&net.pubring, "node0", packet_id, 0);
    match net.nodes[0].process_mail(&stale) {
        Err(MixError::Stale(0)) => {}
        other => panic!("expected Stale, got ok={}", other.is_ok()),
    }
    assert_eq!(net.idlog_entries(0), 0);
    assert_eq!(net.nodes[0].pool().count().unwrap(), 0);

    // The same Packet-ID with a fresh stamp is accepted, proving the
    // stale attempt recorded nothing.
    let fresh = handmade_packet(&net.pubring, "node0", packet_id, mixnode::timing::epoch_days());
    assert!(net.nodes[0].process_mail(&fresh).is_ok());
    assert_eq!(net.idlog_entries(0), 1);
}

#[test]
fn dummy_injection_roundtrip() {
    let net = TestNet::build(1, |config, _| {
        config.pool.outdummy = 100;
        config.pool.size = 100; // keep the drain quiet
    });

    net.nodes[0].pool().trigger();
    let mut mailer = RecordingMailer::default();
    let report = net.nodes[0].tick(&mut mailer).unwrap();
    assert!(report.want_dummy);
    assert_eq!(net.nodes[0].pool().count().unwrap(), 1);

    // The injected message decodes, end to end, to a dummy drop.
    let dummy = net.pooled_email(0);
    assert_eq!(dummy.get("To"), Some("mix@node0.example"));
    match net.nodes[0].process_mail(&dummy).unwrap() {
        Disposition::Dummy => {}
        _ => panic!("expected a dummy drop"),
    }
}

#[test]
fn chunked_delivery_out_of_order() {
    let net = TestNet::build(1, |_, _| {});
    let body = "all work and no play makes a dull mix\n".repeat(674); // ~25 kB
    assert!(body.len() > 25_000);

    let emails = net
        .encoder()
        .encode_message(&plain_message("carol@example", &body), &["node0".to_string()])
        .unwrap();
    assert_eq!(emails.len(), 3);

    let mut delivered = 0;
    for i in [2usize, 0, 1] {
        match net.nodes[0].process_mail(&emails[i]).unwrap() {
            Disposition::Pooled(n) => delivered += n,
            Disposition::ChunkStored => {}
            Disposition::Dummy => panic!("chunk misread as dummy"),
        }
    }
    assert_eq!(delivered, 1, "reassembly must deliver exactly once");

    net.nodes[0].pool().trigger();
    let mut mailer = RecordingMailer::default();
    net.nodes[0].tick(&mut mailer).unwrap();
    assert_eq!(mailer.sent.len(), 1);
    assert_eq!(mailer.sent[0].0, "carol@example");
    // The reassembled body survives intact.
    let sent = Email::parse(&mailer.sent[0].1);
    assert_eq!(sent.body(), body);
}

#[test]
fn blocked_destination_reenters_as_random_hop() {
    let net = TestNet::build(1, |config, _| {
        config.general.dest_block = vec!["@blocked.example".to_string()];
    });
    let emails = net
        .encoder()
        .encode_message(
            &plain_message("victim@blocked.example", "not this way\n"),
            &["node0".to_string()],
        )
        .unwrap();

    // The packet is consumed and a fresh random-hop packet is pooled in
    // place of a delivery.
    match net.nodes[0].process_mail(&emails[0]).unwrap() {
        Disposition::Pooled(1) => {}
        _ => panic!("expected a re-encoded packet"),
    }
    let bounced = net.pooled_email(0);
    // Addressed to a remailer, not to the blocked recipient.
    assert_eq!(bounced.get("To"), Some("mix@node0.example"));
    assert!(bounced.body().contains("-----BEGIN REMAILER MESSAGE-----"));
}
