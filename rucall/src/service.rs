use std::collections::HashMap;

use foldhash::fast::RandomState;
use futures_util::{FutureExt, future::BoxFuture};
use serde::Serialize;

use crate::{
    Invocation,
    error::{Error, ErrorKind, Result},
};

pub type Method =
    Box<dyn Fn(Invocation) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Handlers served by a [`Server`](crate::Server), keyed by the interface
/// attachment and the method name of the invocation.
#[derive(Default)]
pub struct ServiceMap {
    methods: HashMap<String, Method, RandomState>,
}

fn method_key(interface: &str, method_name: &str) -> String {
    format!("{interface}/{method_name}")
}

impl ServiceMap {
    /// Registers `handler` for `method_name` of `interface`, replacing any
    /// earlier handler.
    pub fn add_method<F, Fut, R>(&mut self, interface: &str, method_name: &str, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        let method: Method = Box::new(move |invocation| {
            handler(invocation)
                .map(|result| -> Result<serde_json::Value> {
                    Ok(serde_json::to_value(result?)?)
                })
                .boxed()
        });
        self.methods
            .insert(method_key(interface, method_name), method);
    }

    /// Registered `interface/method` keys, in no particular order.
    pub fn method_names(&self) -> impl Iterator<Item = &String> {
        self.methods.keys()
    }

    /// Runs the handler matching `invocation`.
    ///
    /// # Errors
    ///
    /// Returns `MethodNotFound` if no handler is registered, otherwise
    /// whatever the handler fails with.
    pub async fn invoke(&self, invocation: Invocation) -> Result<serde_json::Value> {
        let key = method_key(invocation.interface().unwrap_or_default(), invocation.method_name());
        match self.methods.get(&key) {
            Some(method) => method(invocation).await,
            None => {
                let msg = format!("method not found: {key}");
                tracing::error!(msg);
                Err(Error::new(ErrorKind::MethodNotFound, msg))
            }
        }
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap")
            .field("methods", &self.methods.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INTERFACE_KEY;

    #[tokio::test]
    async fn test_service_map() {
        let mut services = ServiceMap::default();
        services.add_method("demo.Echo", "Echo", |invocation: Invocation| async move {
            invocation.argument::<String>(0)
        });
        assert_eq!(services.method_names().count(), 1);

        let invocation = Invocation::new("Echo", vec!["hi".into()])
            .with_attachment(INTERFACE_KEY, "demo.Echo");
        let value = services.invoke(invocation).await.unwrap();
        assert_eq!(value, serde_json::json!("hi"));

        // same method name, no interface attachment.
        let err = services
            .invoke(Invocation::new("Echo", vec!["hi".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodNotFound);

        let invocation = Invocation::new("Echo", vec![serde_json::json!(1)])
            .with_attachment(INTERFACE_KEY, "demo.Echo");
        let err = services.invoke(invocation).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
