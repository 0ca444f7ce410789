//! Channel decorated with an interceptor.
use std::fmt;
use std::sync::Arc;

use crate::interceptor::ClientInterceptor;
use crate::transport::{CallOptions, Channel, ClientCall, MethodDescriptor};

pub struct InterceptedChannel<C, I> {
    channel: C,
    interceptor: Arc<I>,
}

/// Routes every call created on `channel` through `interceptor`.
pub fn intercept<C, I>(channel: C, interceptor: I) -> InterceptedChannel<C, I>
where
    C: Channel + Clone + 'static,
    I: ClientInterceptor,
{
    InterceptedChannel {
        channel,
        interceptor: Arc::new(interceptor),
    }
}

impl<C, I> InterceptedChannel<C, I> {
    pub fn inner(&self) -> &C {
        &self.channel
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }
}

impl<C: Clone, I> Clone for InterceptedChannel<C, I> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<C, I> Channel for InterceptedChannel<C, I>
where
    C: Channel + Clone + 'static,
    I: ClientInterceptor,
{
    fn new_call<Req, Resp>(
        &self,
        method: &MethodDescriptor,
        options: &CallOptions,
    ) -> Box<dyn ClientCall<Req, Resp>>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
    {
        self.interceptor
            .intercept_call(method, options.clone(), &self.channel)
    }
}
