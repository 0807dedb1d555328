use std::time::Duration;

use rucall::{Error, ErrorKind, INTERFACE_KEY, Invocation, Result, ServiceMap};
use serde::{Deserialize, Serialize};

pub const USER_PROVIDER: &str = "com.ikurento.user.UserProvider";

/// How long `GetUser0` takes to answer.
pub const GET_USER0_DELAY: Duration = Duration::from_millis(300);

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Builds an invocation of a `UserProvider` method.
#[must_use]
pub fn user_invocation(method_name: &str, arguments: Vec<serde_json::Value>) -> Invocation {
    Invocation::new(method_name, arguments).with_attachment(INTERFACE_KEY, USER_PROVIDER)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UserProvider;

impl UserProvider {
    /// Registers every `UserProvider` method.
    pub fn export(self, services: &mut ServiceMap) {
        services.add_method(USER_PROVIDER, "GetUser", |inv: Invocation| async move {
            Ok::<_, Error>(User {
                id: inv.argument(0)?,
                name: inv.argument(1)?,
            })
        });
        services.add_method(USER_PROVIDER, "GetUser0", |inv: Invocation| async move {
            tokio::time::sleep(GET_USER0_DELAY).await;
            Ok::<_, Error>(User {
                id: inv.argument(0)?,
                name: inv.argument(2)?,
            })
        });
        services.add_method(USER_PROVIDER, "GetUser1", |_: Invocation| async {
            Ok::<_, Error>(())
        });
        services.add_method(USER_PROVIDER, "GetUser2", |_: Invocation| async {
            Err::<(), _>(Error::new(
                ErrorKind::Unknown("error".to_string()),
                "error".to_string(),
            ))
        });
        services.add_method(USER_PROVIDER, "GetUser6", |inv: Invocation| async move {
            let id: i64 = inv.argument(0)?;
            Ok::<_, Error>((id != 0).then(|| User {
                id: id.to_string(),
                name: String::new(),
            }))
        });
    }
}
