mod common;

use common::{RawClient, TestSink};
use mailsink_rs::events::DomainEvent;

#[tokio::test]
async fn test_full_session_persists_one_message() {
    let sink = TestSink::start().await;
    let mut subscriber = sink.events.subscribe();

    let (mut client, greeting) = RawClient::connect(sink.addr).await;
    assert!(greeting.starts_with("220 sink.test"));

    assert!(client.command("HELO test").await.starts_with("250"));
    assert!(client.command("MAIL FROM:<a@b.com>").await.starts_with("250"));
    assert!(client.command("RCPT TO:<c@d.com>").await.starts_with("250"));
    assert!(client.command("DATA").await.starts_with("354"));
    client.send_raw(b"first line\r\nsecond line\r\n").await;
    assert!(client.command(".").await.starts_with("250"));
    assert!(client.command("QUIT").await.starts_with("221"));

    let stored = sink.stored().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], b"first line\r\nsecond line\r\n");

    let Some(DomainEvent::NewMessage(message)) = subscriber.recv().await else {
        panic!("expected NewMessage");
    };
    assert_eq!(message.mail_from, "a@b.com");
    assert_eq!(message.recipients, vec!["c@d.com"]);
    assert_eq!(message.size, stored[0].len() as u64);

    sink.stop().await;
}

#[tokio::test]
async fn test_one_byte_fragments_and_bare_lf() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    let script = b"EHLO frag\nMAIL FROM:<a@b.com>\r\nRCPT TO:<c@d.com>\nDATA\r\n";
    for byte in script.iter() {
        client.send_raw(&[*byte]).await;
    }
    let ehlo = client.reply().await;
    assert!(ehlo.starts_with("250-sink.test Hello frag"));
    assert!(ehlo.contains("250-8BITMIME"));
    assert!(client.reply().await.starts_with("250"));
    assert!(client.reply().await.starts_with("250"));
    assert!(client.reply().await.starts_with("354"));

    for byte in b"Subject: split\n\nbody\n.\n".iter() {
        client.send_raw(&[*byte]).await;
    }
    assert!(client.reply().await.starts_with("250"));

    assert_eq!(sink.stored().await, vec![b"Subject: split\r\n\r\nbody\r\n".to_vec()]);
    sink.stop().await;
}

#[tokio::test]
async fn test_out_of_sequence_commands_are_rejected() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    assert!(client.command("RCPT TO:<c@d.com>").await.starts_with("503"));
    assert!(client.command("DATA").await.starts_with("503"));
    assert!(client.command("MAIL FROM:<a@b.com>").await.starts_with("250"));
    assert!(client.command("MAIL FROM:<x@y.com>").await.starts_with("503"));
    assert!(client.command("DATA").await.starts_with("503"));
    assert!(client.command("FROB").await.starts_with("500"));
    assert!(client.command("RSET").await.starts_with("250"));
    assert!(client.command("NOOP").await.starts_with("250"));

    assert!(sink.stored().await.is_empty());
    sink.stop().await;
}

#[tokio::test]
async fn test_two_transactions_on_one_connection() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    for n in 0..2 {
        client.command("MAIL FROM:<a@b.com>").await;
        client.command(&format!("RCPT TO:<rcpt{}@d.com>", n)).await;
        client.command("DATA").await;
        client.send_raw(format!("Subject: {}\r\n\r\n..dotted\r\n", n).as_bytes()).await;
        assert!(client.command(".").await.starts_with("250"));
    }

    let stored = sink.stored().await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| m.ends_with(b"\r\n.dotted\r\n")));
    sink.stop().await;
}

#[tokio::test]
async fn test_size_limits() {
    let sink = TestSink::start_with(|config| config.smtp.max_message_size = 64).await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    let reply = client.command("MAIL FROM:<a@b.com> SIZE=1000").await;
    assert!(reply.starts_with("552"));

    client.command("MAIL FROM:<a@b.com>").await;
    client.command("RCPT TO:<c@d.com>").await;
    client.command("DATA").await;
    client.send_raw(format!("{}\r\n", "x".repeat(200)).as_bytes()).await;
    assert!(client.command(".").await.starts_with("552"));

    // Session reset: a fresh transaction is accepted
    assert!(client.command("MAIL FROM:<a@b.com>").await.starts_with("250"));
    assert!(sink.stored().await.is_empty());
    sink.stop().await;
}

#[tokio::test]
async fn test_smtputf8_body_is_stored_as_utf8() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    client.command("EHLO test").await;
    client.command("MAIL FROM:<a@b.com> SMTPUTF8").await;
    client.command("RCPT TO:<c@d.com>").await;
    client.command("DATA").await;
    client.send_raw("Subject: café\r\n\r\nnaïve\r\n".as_bytes()).await;
    assert!(client.command(".").await.starts_with("250"));

    let stored = sink.stored().await;
    assert_eq!(stored[0], "Subject: café\r\n\r\nnaïve\r\n".as_bytes());
    sink.stop().await;
}

#[tokio::test]
async fn test_latin1_bytes_survive_without_utf8() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;

    client.command("MAIL FROM:<a@b.com>").await;
    client.command("RCPT TO:<c@d.com>").await;
    client.command("DATA").await;
    client.send_raw(b"caf\xe9 \xff\r\n").await;
    assert!(client.command(".").await.starts_with("250"));

    assert_eq!(sink.stored().await[0], b"caf\xe9 \xff\r\n");
    sink.stop().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let sink = TestSink::start().await;
    let (mut client, _) = RawClient::connect(sink.addr).await;
    client.command("HELO test").await;

    sink.stop().await;
    assert_eq!(client.reply().await, "");
}
