use std::{fmt::Display, marker::PhantomData};

use reqwest::StatusCode;

use crate::{
    action::{ActionError, ActionResponse, InArgumentPayload, SoapMessage},
    templates::service_description::Scpd,
    urn::URN,
    FromXml,
};

/// A remote action as described by a fetched SCPD: just its name and the
/// in/out argument names in document order. The control point never knows
/// the static Rust type of a remote action's arguments -- it only knows
/// their names -- so dispatch stays entirely string-keyed.
#[derive(Debug, Clone)]
pub struct Action {
    name: String,
    pub in_args: Vec<String>,
    pub out_args: Vec<String>,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result of invoking a remote action. `valid` is false for any non-200
/// HTTP status or SOAP fault; `arguments` preserves document order and
/// carries `Result` (DIDL-Lite) verbatim, unescaped but otherwise unparsed.
#[derive(Debug, Clone, Default)]
pub struct ActionReply {
    pub valid: bool,
    pub arguments: Vec<(String, String)>,
}

impl ActionReply {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
pub enum ActionCallError {
    NotSupported,
    HttpError,
    Other(anyhow::Error),
    Action(ActionError),
}

pub type ActionCallResult<T> = Result<T, ActionCallError>;

impl Display for ActionCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionCallError::NotSupported => write!(f, "Action not supported"),
            ActionCallError::HttpError => write!(f, "Http error"),
            ActionCallError::Other(e) => write!(f, "Other: {e}"),
            ActionCallError::Action(action_error) => action_error.fmt(f),
        }
    }
}

impl std::error::Error for ActionCallError {}

impl From<reqwest::Error> for ActionCallError {
    fn from(_value: reqwest::Error) -> Self {
        Self::HttpError
    }
}

impl From<anyhow::Error> for ActionCallError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value)
    }
}

impl From<ActionError> for ActionCallError {
    fn from(value: ActionError) -> Self {
        Self::Action(value)
    }
}

/// Marks a Rust type as the static counterpart of a remote service's URN.
/// Only used to brand a [`ScpdClient`] with the service type it talks to;
/// the action dispatch itself stays fully dynamic (see [`ActionReply`]).
pub trait ScpdService: Send + 'static {
    const URN: URN;
}

#[derive(Debug)]
pub struct ScpdClient<T: ScpdService> {
    pub fetch_client: reqwest::Client,
    pub actions: Vec<Action>,
    pub control_url: String,
    _p: PhantomData<T>,
}

impl<T: ScpdService> ScpdClient<T> {
    pub fn new(scpd: Scpd, control_url: String) -> Self {
        let actions = scpd
            .actions
            .into_iter()
            .map(|action| Action {
                name: action.name,
                in_args: action.in_args,
                out_args: action.out_args,
            })
            .collect();

        let fetch_client = reqwest::Client::new();

        Self {
            actions,
            control_url,
            fetch_client,
            _p: PhantomData,
        }
    }

    pub fn action(&self, name: &str) -> Result<&Action, ActionCallError> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or(ActionCallError::NotSupported)
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Builds the SOAP envelope for `action_name` with `arguments` in the
    /// given order, POSTs it, and parses the reply: HTTP 200 and a
    /// well-formed `...Response` element is success; anything else
    /// (including a SOAP `Fault`) comes back as an invalid reply with no
    /// arguments, never an error the caller has to unwrap.
    pub async fn call_action(
        &self,
        action_name: &str,
        arguments: &[(&str, &str)],
    ) -> ActionCallResult<ActionReply> {
        self.call_action_with(action_name, arguments, |res| async move {
            if res.status() != StatusCode::OK {
                return Ok(ActionReply::default());
            }
            let body = crate::xml_fetch::read_body_bounded(res).await?;
            let mut reader = quick_xml::Reader::from_reader(body.as_slice());
            let parsed =
                SoapMessage::<Result<ActionResponse<InArgumentPayload>, ActionError>>::read_xml(
                    &mut reader,
                )?
                .into_inner();

            match parsed {
                Ok(response) => Ok(ActionReply {
                    valid: true,
                    arguments: response
                        .args
                        .into_iter()
                        .map(|a| (a.name, a.value.into_owned()))
                        .collect(),
                }),
                Err(_fault) => Ok(ActionReply::default()),
            }
        })
        .await
    }

    /// Like [`Self::call_action`], but hands the live, not-yet-consumed
    /// response to `processor` instead of buffering and parsing it.
    /// Lets a caller stream a large `Result` (DIDL-Lite) payload directly
    /// rather than holding the whole SOAP reply in memory twice.
    pub async fn call_action_with<F, Fut, R>(
        &self,
        action_name: &str,
        arguments: &[(&str, &str)],
        processor: F,
    ) -> ActionCallResult<R>
    where
        F: FnOnce(reqwest::Response) -> Fut,
        Fut: std::future::Future<Output = ActionCallResult<R>>,
    {
        let mut writable = crate::action::WritableAction::new(action_name, T::URN)?;
        for (name, value) in arguments {
            writable.write_argument(name, *value)?;
        }
        let payload = writable.finish()?;

        let header = format!("\"{}#{}\"", T::URN, action_name);
        let request = self
            .fetch_client
            .request(reqwest::Method::POST, self.control_url())
            .header("SOAPACTION", header)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(payload)
            .build()?;
        let res = self.fetch_client.execute(request).await?;
        tracing::trace!("{action_name} action response status: {}", res.status());
        processor(res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyService;
    impl ScpdService for DummyService {
        const URN: URN = URN {
            version: 1,
            urn_type: crate::urn::UrnType::Service(crate::urn::ServiceType::ContentDirectory),
        };
    }

    #[test]
    fn action_reply_get_finds_named_argument() {
        let reply = ActionReply {
            valid: true,
            arguments: vec![
                ("NumberReturned".into(), "3".into()),
                ("Result".into(), "<DIDL-Lite/>".into()),
            ],
        };
        assert_eq!(reply.get("Result"), Some("<DIDL-Lite/>"));
        assert_eq!(reply.get("Missing"), None);
    }

    #[test]
    fn scpd_client_wraps_scpd_actions() {
        let scpd = Scpd {
            actions: vec![crate::templates::service_description::ScpdAction {
                name: "Browse".into(),
                in_args: vec!["ObjectID".into()],
                out_args: vec!["Result".into()],
            }],
        };
        let client = ScpdClient::<DummyService>::new(scpd, "http://host/control".into());
        let action = client.action("Browse").unwrap();
        assert_eq!(action.in_args, vec!["ObjectID".to_string()]);
    }
}
