//! End-to-end behaviour of links against a simulated board.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pinlink::transport::virtual_device::{self, DeviceCommand};
use pinlink::{
    Command, ConnectionEvent, DefaultLinkFactory, Error, Event, IncomingMessage, LinkCache,
    LinkUri, ListenerResult, Pin, PinEvent, ProtocolConfig, QosLink, QosState, ReplyMode,
    Subscription, Tone,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Waits until a subscription delivers a message.
async fn next_message(sub: &mut Subscription) -> IncomingMessage {
    loop {
        match sub.recv().await {
            Some(Event::Message(m)) => return m,
            Some(Event::Connection(_)) => {}
            None => panic!("dispatcher dropped"),
        }
    }
}

#[tokio::test]
async fn pin_listeners_only_see_their_pin() {
    init_tracing();
    let (link, device) = virtual_device::connect(ProtocolConfig::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    link.dispatcher()
        .add_pin_listener(Some(Pin::Digital(2)), move |e: &PinEvent| -> ListenerResult {
            sink.lock().unwrap().push(*e);
            Ok(())
        });
    let mut sub = link.dispatcher().subscribe();

    let pin2 = PinEvent::Digital { pin: 2, value: true };
    let pin3 = PinEvent::Digital { pin: 3, value: true };
    let analog2 = PinEvent::Analog { pin: 2, value: 10 };
    for event in [pin3, pin2, analog2] {
        device
            .emit(&IncomingMessage::PinValueChanged(event))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        next_message(&mut sub).await;
    }

    assert_eq!(*seen.lock().unwrap(), vec![pin2]);
}

#[tokio::test]
async fn custom_messages_arrive_in_order() {
    let (link, device) = virtual_device::connect(ProtocolConfig::new().divider(b'\n'));
    let mut sub = link.dispatcher().subscribe();

    for text in ["one", "two", "three"] {
        device
            .emit(&IncomingMessage::Custom(text.into()))
            .await
            .unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(next_message(&mut sub).await);
    }
    assert_eq!(
        received,
        vec![
            IncomingMessage::Custom("one".into()),
            IncomingMessage::Custom("two".into()),
            IncomingMessage::Custom("three".into()),
        ]
    );
}

#[tokio::test]
async fn failing_listener_does_not_block_others() {
    let (link, device) = virtual_device::connect(ProtocolConfig::default());
    let count = Arc::new(Mutex::new(0));

    link.dispatcher()
        .add_custom_listener(|_: &str| -> ListenerResult { Err("broken".into()) });
    link.dispatcher()
        .add_custom_listener(|_: &str| -> ListenerResult { panic!("listener bug") });
    let counter = Arc::clone(&count);
    link.dispatcher()
        .add_custom_listener(move |_: &str| -> ListenerResult {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
    let mut sub = link.dispatcher().subscribe();

    device
        .emit(&IncomingMessage::Custom("a".into()))
        .await
        .unwrap();
    device
        .emit(&IncomingMessage::Custom("b".into()))
        .await
        .unwrap();
    next_message(&mut sub).await;
    next_message(&mut sub).await;

    assert_eq!(*count.lock().unwrap(), 2);
}

#[tokio::test]
async fn plain_commands_reach_the_board() {
    let (link, mut device) = virtual_device::connect(ProtocolConfig::default());

    let tone = Tone::new(9, 440).duration(Duration::from_millis(250));
    link.send_tone(tone).await.unwrap();
    link.send_custom_messages(["led", "blink"]).await.unwrap();

    assert_eq!(
        device.next_command().await,
        Some(DeviceCommand {
            command: Command::Tone(tone),
            id: None,
        })
    );
    assert_eq!(
        device.next_command().await.map(|c| c.command),
        Some(Command::CustomMessages(vec!["led".into(), "blink".into()]))
    );
}

#[tokio::test(start_paused = true)]
async fn qos_link_round_trip() {
    let (link, mut device) = virtual_device::connect(ProtocolConfig::default());
    let qos = QosLink::new(Arc::new(link)).with_timeout(Duration::from_millis(500));

    let reply = qos.switch_digital_pin(13, true).await.unwrap();
    assert!(reply.ok);
    assert_eq!(qos.state(), QosState::Idle);

    let received = device.next_command().await.unwrap();
    assert_eq!(received.id, Some(reply.id));

    device.set_reply_mode(ReplyMode::Silent);
    let err = qos.switch_digital_pin(13, false).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { elapsed_ms, .. } if elapsed_ms >= 500));
    assert_eq!(qos.state(), QosState::Idle);

    device.set_reply_mode(ReplyMode::Ok);
    assert!(qos.send_no_tone(9).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn lost_connection_fails_pending_request() {
    let (link, device) = virtual_device::connect(ProtocolConfig::default());
    let lost = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lost);
    link.dispatcher()
        .add_connection_listener(move |e: &ConnectionEvent| -> ListenerResult {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        });

    device.set_reply_mode(ReplyMode::Silent);
    let qos = QosLink::new(Arc::new(link)).with_timeout(Duration::from_secs(30));
    let caller = qos.clone();
    let call = tokio::spawn(async move { caller.send_no_tone(1).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    device.disconnect().await.unwrap();

    assert!(matches!(call.await.unwrap(), Err(Error::Closed)));
    assert!(
        lost.lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Lost { .. }))
    );
}

#[tokio::test]
async fn cache_shares_virtual_links() {
    init_tracing();
    let cache = LinkCache::new(DefaultLinkFactory);
    let uri: LinkUri = "ardulink://virtual?qos=true&timeout=2s".parse().unwrap();

    let first = cache.get_link(&uri).await.unwrap();
    let second = cache
        .get_link(&"ardulink://virtual?timeout=2s&divider=255&qos=true".parse().unwrap())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(first.link(), second.link()));
    assert_eq!(cache.len().await, 1);

    let qos = first.qos().unwrap().unwrap();
    assert_eq!(qos.timeout(), Duration::from_secs(2));
    assert!(qos.start_listening(Pin::Analog(0)).await.unwrap().ok);

    let link = Arc::clone(first.link());
    first.close().await.unwrap();
    assert!(!link.is_closed());
    second.close().await.unwrap();
    assert!(link.is_closed());
    assert!(cache.is_empty().await);
}
