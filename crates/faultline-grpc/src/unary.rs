//! Future-based unary call helper.
use std::fmt;

use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::transport::{CallOptions, Channel, Listener, MethodDescriptor};

/// Starts a unary call on `channel`, sends `request` and resolves to the
/// single response or the terminal failure status.
pub async fn unary_call<C, Req, Resp>(
    channel: &C,
    method: &MethodDescriptor,
    options: CallOptions,
    headers: MetadataMap,
    request: Req,
) -> Result<Resp, Status>
where
    C: Channel,
    Req: fmt::Debug + Send + 'static,
    Resp: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let mut call = channel.new_call::<Req, Resp>(method, &options);
    call.start(
        Box::new(UnaryListener {
            response: None,
            tx: Some(tx),
        }),
        headers,
    );
    // Two tokens, so that a second response is detected instead of stalling.
    call.request(2);
    if let Err(status) = call.send_message(request) {
        call.cancel(Some("send failed"));
        return Err(status);
    }
    call.half_close();

    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Status::cancelled("call dropped without completing")),
    }
}

struct UnaryListener<Resp> {
    response: Option<Resp>,
    tx: Option<oneshot::Sender<Result<Resp, Status>>>,
}

impl<Resp: Send> Listener<Resp> for UnaryListener<Resp> {
    fn on_message(&mut self, message: Resp) -> Result<(), Status> {
        if self.response.is_some() {
            return Err(Status::internal("too many responses for a unary call"));
        }
        self.response = Some(message);
        Ok(())
    }

    fn on_close(&mut self, status: Status, _trailers: MetadataMap) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let result = if status.code() == Code::Ok {
            self.response
                .take()
                .ok_or_else(|| Status::internal("unary call closed without a response"))
        } else {
            Err(status)
        };
        // The caller may have stopped waiting.
        let _ = tx.send(result);
    }
}
