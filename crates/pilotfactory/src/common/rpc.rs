use std::fmt::{Debug, Formatter};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Can be used to hand a processed request back to the task that made it.
#[must_use = "response token should be used to respond to a request"]
pub struct ResponseToken<T> {
    sender: oneshot::Sender<T>,
}

impl<T> Debug for ResponseToken<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Response token")
    }
}

impl<T> ResponseToken<T> {
    pub fn respond(self, response: T) {
        if self.sender.send(response).is_err() {
            log::warn!("Could not hand back a processed request, the requester hung up");
        }
    }
}

/// Helper function for creating request-response calls.
/// Expects a callback that will receive a response token; the returned receiver resolves once
/// the token has been used.
pub fn initiate_request<F, Response, R>(make_request: F) -> oneshot::Receiver<Response>
where
    F: FnOnce(ResponseToken<Response>) -> Result<(), mpsc::error::SendError<R>>,
{
    let (tx, rx) = oneshot::channel::<Response>();
    let token = ResponseToken { sender: tx };
    if make_request(token).is_err() {
        log::warn!("Could not make request, the receiving worker is gone");
    }
    rx
}

/// Waits for a response, waking up every `poll_interval` to report that the request is still
/// pending. Returns `None` if the responder was dropped without answering.
pub async fn wait_for_response<T>(
    mut receiver: oneshot::Receiver<T>,
    poll_interval: Duration,
    description: &str,
) -> Option<T> {
    let mut waited = Duration::ZERO;
    loop {
        match tokio::time::timeout(poll_interval, &mut receiver).await {
            Ok(result) => return result.ok(),
            Err(_) => {
                waited += poll_interval;
                log::debug!(
                    "Still waiting for {description} ({})",
                    humantime::format_duration(waited)
                );
            }
        }
    }
}

pub type RpcSender<T> = mpsc::UnboundedSender<T>;
pub type RpcReceiver<T> = mpsc::UnboundedReceiver<T>;

pub fn make_rpc_queue<T>() -> (RpcSender<T>, RpcReceiver<T>) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::{initiate_request, make_rpc_queue, wait_for_response, ResponseToken};
    use std::time::Duration;

    #[tokio::test]
    async fn response_arrives_after_several_polls() {
        let (tx, mut rx) = make_rpc_queue::<ResponseToken<u32>>();
        let receiver = initiate_request(|token| tx.send(token));
        tokio::spawn(async move {
            let token = rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.respond(42);
        });
        let response = wait_for_response(receiver, Duration::from_millis(5), "answer").await;
        assert_eq!(response, Some(42));
    }

    #[tokio::test]
    async fn dropped_responder_yields_none() {
        let (tx, rx) = make_rpc_queue::<ResponseToken<u32>>();
        drop(rx);
        let receiver = initiate_request(|token| tx.send(token));
        let response = wait_for_response(receiver, Duration::from_millis(5), "answer").await;
        assert!(response.is_none());
    }
}
