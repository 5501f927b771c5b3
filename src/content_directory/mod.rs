use std::{fmt::Display, str::FromStr};

use quick_xml::events::{BytesText, Event};

use crate::{
    action::{ActionError, ActionErrorCode, IntoValueList},
    service::ArgumentScanner,
};

use super::{
    action::Action,
    service::Service,
    service_variables::{self, IntoUpnpValue, SVariable, StateVariableDescriptor},
    templates::{service_description::ServiceDescription, SpecVersion},
    urn::{ServiceType, UrnType, URN},
    IntoXml, XmlWriter,
};

/// The embedding application supplies its own DIDL-Lite bodies; this crate
/// never parses or builds object/container trees, it only carries the
/// Browse() action envelope and passes the XML through verbatim.
pub trait ContentDirectoryHandler {
    fn browse_direct_children(
        &self,
        object_id: &str,
        starting_index: u32,
        requested_count: u32,
    ) -> impl std::future::Future<Output = Result<DidlResult, ActionError>> + Send;
    fn browse_metadata(
        &self,
        object_id: &str,
    ) -> impl std::future::Future<Output = Result<DidlResult, ActionError>> + Send;
    fn system_update_id(&self) -> impl std::future::Future<Output = u32> + Send;
}

/// A Browse() result: a verbatim DIDL-Lite document plus the counts the
/// action reply needs. `total_matches` may legitimately differ from
/// `number_returned` when the handler paginates.
#[derive(Debug, Clone)]
pub struct DidlResult {
    pub didl_lite: String,
    pub number_returned: u32,
    pub total_matches: u32,
}

#[derive(Debug, Clone)]
pub struct ContentDirectoryService<T: ContentDirectoryHandler> {
    pub handler: T,
}

impl<T: ContentDirectoryHandler> ContentDirectoryService<T> {
    pub fn new(handler: T) -> Self {
        Self { handler }
    }
}

impl<T: ContentDirectoryHandler> ContentDirectoryService<T> {
    async fn browse(
        &self,
        object_id: String,
        browse_flag: BrowseFlag,
        filter: String,
        starting_index: u32,
        requested_count: u32,
        sort_criteria: String,
    ) -> Result<(String, u32, u32, u32), ActionError> {
        tracing::debug!(
            object_id,
            %browse_flag,
            filter,
            starting_index,
            requested_count,
            sort_criteria,
            "invoking Browse action"
        );
        let result = match browse_flag {
            BrowseFlag::BrowseDirectChildren => {
                self.handler
                    .browse_direct_children(&object_id, starting_index, requested_count)
                    .await?
            }
            BrowseFlag::BrowseMetadata => self.handler.browse_metadata(&object_id).await?,
        };
        let update_id = self.handler.system_update_id().await;
        Ok((
            result.didl_lite,
            result.number_returned,
            result.total_matches,
            update_id,
        ))
    }
}

#[derive(Debug)]
/// This required state variable is introduced to provide type information for the BrowseFlag
/// argument in the Browse() action. A BrowseFlag argument specifies a browse option to be
/// used for browsing the ContentDirectory service
enum BrowseFlag {
    /// This is used to browse the direct children of a container (like folders or files).
    BrowseDirectChildren,
    /// This is used to retrieve metadata for a specific object (such as a container or an item).
    BrowseMetadata,
}

impl Display for BrowseFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowseFlag::BrowseDirectChildren => write!(f, "BrowseDirectChildren"),
            BrowseFlag::BrowseMetadata => write!(f, "BrowseMetadata"),
        }
    }
}

impl FromStr for BrowseFlag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BrowseMetadata" => Ok(Self::BrowseMetadata),
            "BrowseDirectChildren" => Ok(Self::BrowseDirectChildren),
            _ => Err(anyhow::anyhow!("unknown browse flag: {s}")),
        }
    }
}

impl IntoXml for BrowseFlag {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::from_escaped(self.to_string())))
    }
}

impl IntoUpnpValue for BrowseFlag {
    const TYPE_NAME: service_variables::DataType = service_variables::DataType::String;

    fn from_xml_value(value: &str) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        value.parse()
    }
}

impl SVariable for BrowseFlag {
    type VarType = Self;
    const VAR_NAME: &str = "A_ARG_TYPE_BrowseFlag";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["BrowseMetadata", "BrowseDirectChildren"]);
}

#[derive(Default, Debug)]
struct SystemUpdateId;
impl SVariable for SystemUpdateId {
    type VarType = u32;
    const VAR_NAME: &str = "SystemUpdateID";
    const SEND_EVENTS: bool = true;
}

#[derive(Default, Debug)]
struct Count;
impl SVariable for Count {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_Count";
}

#[derive(Default, Debug)]
struct SortCriteria;
impl SVariable for SortCriteria {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_SortCriteria";
}

#[derive(Default, Debug)]
struct Index;
impl SVariable for Index {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_Index";
}

#[derive(Default, Debug)]
struct ObjectID;
impl SVariable for ObjectID {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_ObjectID";
}

#[derive(Default, Debug)]
struct UpdateID;
impl SVariable for UpdateID {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_UpdateID";
}

#[derive(Default, Debug)]
struct ArgResult;
impl SVariable for ArgResult {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_Result";
}

#[derive(Default, Debug)]
struct Filter;
impl SVariable for Filter {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_Filter";
}

impl<T: ContentDirectoryHandler + Send + Sync + 'static> Service for ContentDirectoryService<T> {
    const NAME: &str = "content_directory";
    const URN: URN = URN {
        version: 1,
        urn_type: UrnType::Service(ServiceType::ContentDirectory),
    };

    fn service_description() -> ServiceDescription {
        let variables = vec![
            StateVariableDescriptor::from_variable::<BrowseFlag>(),
            StateVariableDescriptor::from_variable::<SystemUpdateId>(),
            StateVariableDescriptor::from_variable::<Count>(),
            StateVariableDescriptor::from_variable::<SortCriteria>(),
            StateVariableDescriptor::from_variable::<Index>(),
            StateVariableDescriptor::from_variable::<ObjectID>(),
            StateVariableDescriptor::from_variable::<UpdateID>(),
            StateVariableDescriptor::from_variable::<ArgResult>(),
            StateVariableDescriptor::from_variable::<Filter>(),
        ];
        ServiceDescription {
            spec_version: SpecVersion::upnp_v2(),
            variables,
            actions: Self::actions(),
        }
    }

    fn actions() -> Vec<Action> {
        let mut browse = Action::empty("Browse");
        browse.add_input::<ObjectID>("ObjectID");
        browse.add_input::<BrowseFlag>("BrowseFlag");
        browse.add_input::<Filter>("Filter");
        browse.add_input::<Index>("StartingIndex");
        browse.add_input::<Count>("RequestedCount");
        browse.add_input::<SortCriteria>("SortCriteria");
        browse.add_output::<ArgResult>("Result");
        browse.add_output::<Count>("NumberReturned");
        browse.add_output::<Count>("TotalMatches");
        browse.add_output::<UpdateID>("UpdateID");
        let mut system_update_id = Action::empty("GetSystemUpdateID");
        system_update_id.add_output::<SystemUpdateId>("Id");

        vec![browse, system_update_id]
    }

    async fn control_handler<'a>(
        &self,
        name: &'a str,
        mut inputs: ArgumentScanner<'a>,
    ) -> anyhow::Result<impl IntoValueList> {
        tracing::debug!("got action: {name}");
        let values = match name {
            "Browse" => {
                let browse_result = self
                    .browse(
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                    )
                    .await?;
                browse_result.into_value_list()
            }
            "GetSystemUpdateID" => self.handler.system_update_id().await.into_value_list(),
            rest => Err(anyhow::anyhow!("unhandled action: {rest}"))?,
        };
        Ok(values)
    }
}

/// The Browse() request failed because the specified ObjectID argument is invalid.
#[derive(Debug)]
pub struct NoSuchObjectError;

impl From<NoSuchObjectError> for ActionError {
    fn from(_value: NoSuchObjectError) -> Self {
        ActionError {
            code: ActionErrorCode::Other(701),
            description: Some("No such object".into()),
        }
    }
}

/// Unsupported or invalid sort criteria.
#[derive(Debug)]
pub struct InvalidSortError;

impl From<InvalidSortError> for ActionError {
    fn from(_value: InvalidSortError) -> Self {
        ActionError {
            code: ActionErrorCode::Other(709),
            description: Some("Unsupported or invalid sort criteria".into()),
        }
    }
}

/// The Browse() request failed because the ContentDirectory service is unable to compute,
/// in the time allotted, the total number of objects that match the browse criteria.
#[derive(Debug)]
pub struct CannotProcessError;

impl From<CannotProcessError> for ActionError {
    fn from(_value: CannotProcessError) -> Self {
        ActionError {
            code: ActionErrorCode::Other(720),
            description: Some("Cannot process the request".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browse_flag_round_trips() {
        assert_eq!(
            "BrowseDirectChildren".parse::<BrowseFlag>().unwrap().to_string(),
            "BrowseDirectChildren"
        );
        assert_eq!(
            "BrowseMetadata".parse::<BrowseFlag>().unwrap().to_string(),
            "BrowseMetadata"
        );
        assert!("Nonsense".parse::<BrowseFlag>().is_err());
    }

    struct StaticHandler;

    impl ContentDirectoryHandler for StaticHandler {
        async fn browse_direct_children(
            &self,
            _object_id: &str,
            _starting_index: u32,
            _requested_count: u32,
        ) -> Result<DidlResult, ActionError> {
            Ok(DidlResult {
                didl_lite: "<DIDL-Lite/>".into(),
                number_returned: 0,
                total_matches: 0,
            })
        }

        async fn browse_metadata(&self, _object_id: &str) -> Result<DidlResult, ActionError> {
            Ok(DidlResult {
                didl_lite: "<DIDL-Lite/>".into(),
                number_returned: 1,
                total_matches: 1,
            })
        }

        async fn system_update_id(&self) -> u32 {
            0
        }
    }

    #[tokio::test]
    async fn browse_passes_didl_through_verbatim() {
        let service = ContentDirectoryService::new(StaticHandler);
        let (didl, returned, total, _update_id) = service
            .browse(
                "0".into(),
                BrowseFlag::BrowseDirectChildren,
                "*".into(),
                0,
                0,
                String::new(),
            )
            .await
            .unwrap();
        assert_eq!(didl, "<DIDL-Lite/>");
        assert_eq!(returned, 0);
        assert_eq!(total, 0);
    }
}
