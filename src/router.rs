//! Pattern-based dispatch of inbound messages and events.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use regex::Regex;
use tracing::debug;

use crate::client::Weixin;
use crate::error::Result;
use crate::reply::ResponseWriter;
use crate::types::Request;

type HandlerFn = Arc<dyn Fn(ResponseWriter, Request) -> BoxFuture<'static, ()> + Send + Sync>;

/// One registered handler with its compiled pattern.
pub(crate) struct Route {
    pattern: Regex,
    handler: HandlerFn,
}

impl Weixin {
    /// Register a handler for a routing-key pattern.
    ///
    /// The pattern must match the whole key: `"text"` matches text messages
    /// only, `"event\\..*"` matches every event, and the `MSG_TYPE_*`
    /// constants cover the common cases. Routes are tried in registration
    /// order and the first match wins.
    pub fn handle_func<F, Fut>(&self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let anchored = Regex::new(&format!("^(?:{})$", pattern))?;
        let handler: HandlerFn = Arc::new(move |w, r| Box::pin(handler(w, r)));
        self.inner.routes.write().push(Route {
            pattern: anchored,
            handler,
        });
        Ok(())
    }

    /// Route a decoded event to the first matching handler.
    ///
    /// Returns the rendered reply body (empty when the handler stayed
    /// silent), or `None` when no route matched.
    pub(crate) async fn dispatch(&self, msg: Request) -> Option<String> {
        let key = msg.routing_key();
        let handler = {
            let routes = self.inner.routes.read();
            routes
                .iter()
                .find(|route| route.pattern.is_match(&key))
                .map(|route| Arc::clone(&route.handler))
        };
        let Some(handler) = handler else {
            debug!(key = %key, "no route matched");
            return None;
        };

        // Replies flow back to the sender.
        let writer = ResponseWriter::new(self.clone(), &msg.from_user_name, &msg.to_user_name);
        handler(writer.clone(), msg).await;
        Some(writer.take_body().unwrap_or_default())
    }
}
