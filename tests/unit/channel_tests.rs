use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use shell_gateway::gateway::channel::{ChannelSender, ChannelSink, CLOSE_NORMAL};
use shell_gateway::{AppError, Result};

#[derive(Debug, Default)]
struct Recorded {
    texts: Vec<String>,
    closes: Vec<(u16, String)>,
}

struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
    fail_sends: bool,
}

impl ChannelSink for MemorySink {
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_sends {
                return Err(AppError::Io("peer went away".into()));
            }
            self.recorded.lock().unwrap().texts.push(text);
            Ok(())
        })
    }

    fn close(
        &mut self,
        code: u16,
        reason: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.recorded.lock().unwrap().closes.push((code, reason));
            Ok(())
        })
    }
}

fn sender(fail_sends: bool) -> (ChannelSender, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let sink = MemorySink {
        recorded: Arc::clone(&recorded),
        fail_sends,
    };
    (ChannelSender::new(sink), recorded)
}

#[tokio::test]
async fn sends_are_recorded_in_order() {
    let (channel, recorded) = sender(false);

    channel.send_text("one".into()).await.unwrap();
    channel.send_text("two".into()).await.unwrap();

    assert_eq!(recorded.lock().unwrap().texts, vec!["one", "two"]);
}

#[tokio::test]
async fn close_is_sent_once() {
    let (channel, recorded) = sender(false);

    channel.close(CLOSE_NORMAL, "bye").await;
    channel.close(CLOSE_NORMAL, "bye again").await;

    assert!(!channel.is_open());
    assert_eq!(
        recorded.lock().unwrap().closes,
        vec![(CLOSE_NORMAL, "bye".to_owned())]
    );
}

#[tokio::test]
async fn send_after_close_is_refused() {
    let (channel, recorded) = sender(false);
    channel.close(CLOSE_NORMAL, "bye").await;

    let err = channel.send_text("late".into()).await.expect_err("closed");
    assert!(matches!(err, AppError::Protocol(_)));
    assert!(recorded.lock().unwrap().texts.is_empty());
}

#[tokio::test]
async fn peer_close_suppresses_close_frame() {
    let (channel, recorded) = sender(false);

    channel.mark_closed();
    channel.close(CLOSE_NORMAL, "bye").await;

    assert!(recorded.lock().unwrap().closes.is_empty());
}

#[tokio::test]
async fn failed_send_marks_channel_closed() {
    let (channel, _recorded) = sender(true);

    let err = channel.send_text("x".into()).await.expect_err("send fails");
    assert!(matches!(err, AppError::Io(_)));
    assert!(!channel.is_open());
}

#[tokio::test]
async fn concurrent_senders_are_serialized() {
    let (channel, recorded) = sender(false);
    let channel = Arc::new(channel);

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let channel = Arc::clone(&channel);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                channel.send_text(format!("{worker}-{i}")).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(recorded.lock().unwrap().texts.len(), 100);
}
