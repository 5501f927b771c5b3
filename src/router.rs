use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, on, post, MethodFilter},
    Router,
};
use axum_extra::headers::{self, HeaderMapExt};

use crate::{
    action::{ActionError, ActionPayload, ActionResponse, InArgumentPayload, IntoValueList, SoapMessage},
    eventing::{EventMessage, SubscribeResponse, SubscribersStore},
    service::{Service, UpnpService},
    templates::UpnpAgent,
};

#[derive(Debug)]
pub struct UpnpRouter<S> {
    path: String,
    router: Router<S>,
}

impl<S> From<UpnpRouter<S>> for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn from(upnp_router: UpnpRouter<S>) -> Self {
        Router::new().nest(&upnp_router.path, upnp_router.router)
    }
}

pub const DESC_PATH: &str = "/devicedesc.xml";

fn headers_to_pairs(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect()
}

impl<T: Clone + Send + Sync + 'static> UpnpRouter<T> {
    /// `description_xml` is the device's own, fully rendered `devicedesc.xml`
    /// body; the router serves it verbatim, it never builds one itself.
    pub fn new(path: &str, description_xml: String) -> Self {
        let description_xml = Arc::new(description_xml);
        let handler = move || {
            let description_xml = description_xml.clone();
            async move {
                tracing::debug!("Serving device description");
                let mut headers = HeaderMap::new();
                headers.typed_insert(headers::ContentType::xml());
                (headers, (*description_xml).clone())
            }
        };
        let router = Router::new().route(DESC_PATH, get(handler));
        Self {
            path: path.to_string(),
            router,
        }
    }

    pub fn register_service<S: Service + Send + Sync + Clone + 'static>(
        mut self,
        service: S,
        subscribers: Arc<SubscribersStore>,
        user_agent: UpnpAgent<'static>,
    ) -> Self {
        let base_path = format!("/{}", S::NAME);
        let control_path = format!("{base_path}/control.xml");
        let scpd_path = format!("{base_path}/scpd.xml");
        let event_path = format!("{base_path}/event.xml");
        let service = UpnpService::new(service);

        let action_handler = move |headers: HeaderMap, body: String| {
            let service = service.clone();
            async move {
                let mut header = headers
                    .get("soapaction")
                    .context("soap_action header")?
                    .to_str()
                    .context("convert header to string")?;
                if let Some(stripped) = header.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                    header = stripped;
                }
                let (_urn, action_name) =
                    header.split_once('#').context("split soapaction header")?;
                tracing::info!("Action {action_name} invoked");
                let action: SoapMessage<ActionPayload<InArgumentPayload>> =
                    SoapMessage::from_xml(body.as_bytes())?;
                let action = action.into_inner();

                if action.name() != action_name {
                    tracing::warn!(
                        "Inconsistence between soapaction header and action payload: {} vs {}",
                        action_name,
                        action.name(),
                    );
                }
                let expected_action = service.find_action(action_name)?;
                let scanner = expected_action.input_scanner(action.arguments);

                let out_arguments = service
                    .s
                    .control_handler(action_name, scanner)
                    .await?
                    .into_value_list();

                let args = expected_action.map_out_variables(out_arguments);

                let action_response = ActionResponse {
                    service_urn: S::URN,
                    action_name: action_name.to_string(),
                    args,
                };
                Ok::<_, ActionError>(action_response)
            }
        };

        let scpd = S::service_description()
            .into_xml()
            .expect("services serialize without errors");
        let scpd_handler = move || {
            let scpd = scpd.clone();
            async move {
                let mut headers = HeaderMap::new();
                headers.typed_insert(headers::ContentType::xml());
                let response = String::from_utf8(scpd).unwrap();
                Ok::<_, ActionError>((headers, response))
            }
        };

        let event_handler = move |method: axum::http::Method, headers: HeaderMap| {
            let subscribers = subscribers.clone();
            let user_agent = user_agent.clone();
            async move {
                let pairs = headers_to_pairs(&headers);
                let message = EventMessage::parse(method.as_str(), pairs.into_iter())
                    .map_err(|_| StatusCode::PRECONDITION_FAILED)?;
                match message {
                    EventMessage::Subscribe { callback, timeout, .. } => {
                        let subscriber = subscribers.subscribe(callback, S::NAME, timeout as u64);
                        let response = SubscribeResponse {
                            user_agent,
                            timeout,
                            sid: subscriber.sid,
                        };
                        Ok(response.to_string())
                    }
                    EventMessage::Renew { sid, timeout } => {
                        let subscriber = subscribers
                            .renew(sid, timeout as u64)
                            .ok_or(StatusCode::PRECONDITION_FAILED)?;
                        let response = SubscribeResponse {
                            user_agent,
                            timeout,
                            sid: subscriber.sid,
                        };
                        Ok(response.to_string())
                    }
                    EventMessage::Unsubscribe { sid } => {
                        subscribers
                            .unsubscribe(sid)
                            .ok_or(StatusCode::PRECONDITION_FAILED)?;
                        Ok(String::new())
                    }
                }
            }
        };

        self.router = self.router.route(&scpd_path, get(scpd_handler));
        self.router = self.router.route(&control_path, post(action_handler));
        self.router = self.router.route(
            &event_path,
            on(
                MethodFilter::from_bytes(b"SUBSCRIBE").expect("valid method")
                    | MethodFilter::from_bytes(b"UNSUBSCRIBE").expect("valid method"),
                event_handler,
            ),
        );
        self
    }
}
