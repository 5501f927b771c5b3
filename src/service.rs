use std::sync::Arc;

use crate::{
    action::{ActionError, ActionErrorCode, InArgumentPayload, IntoValueList},
    service_variables::IntoUpnpValue,
};

use super::{action::Action, templates::service_description::ServiceDescription, urn::URN};

pub trait Service {
    const NAME: &str;
    const URN: URN;

    fn service_description() -> ServiceDescription;
    fn actions() -> Vec<Action>;
    fn control_handler<'a>(
        &self,
        name: &'a str,
        inputs: ArgumentScanner<'a>,
    ) -> impl std::future::Future<Output = anyhow::Result<impl IntoValueList>> + Send;
}

/// Walks a received action's arguments in lockstep with the names the
/// action's `Action` definition expects, rejecting anything out of order.
#[derive(Debug)]
pub struct ArgumentScanner<'a> {
    payload: std::vec::IntoIter<InArgumentPayload<'a>>,
    expected: std::vec::IntoIter<&'a str>,
}

impl<'a> ArgumentScanner<'a> {
    pub fn new(payload: Vec<InArgumentPayload<'a>>, expected: Vec<&'a str>) -> Self {
        Self {
            payload: payload.into_iter(),
            expected: expected.into_iter(),
        }
    }

    pub fn next<T: IntoUpnpValue>(&mut self) -> Result<T, ActionError> {
        let Some(expected_next) = self.expected.next() else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        let Some(next) = self.payload.next() else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        if next.name() != expected_next {
            return Err(ActionErrorCode::InvalidArguments.into());
        }
        let Ok(arg) = T::from_xml_value(&next.value) else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        Ok(arg)
    }

    /// Same as [`Self::next`], named to match the blanket
    /// `ScannableArguments` impl used by generic action dispatch.
    pub fn next_unchecked<T: IntoUpnpValue>(&mut self) -> Result<T, ActionError> {
        self.next()
    }
}

#[derive(Debug, Clone)]
pub struct UpnpService<S: Service> {
    pub actions: Arc<Vec<Action>>,
    pub s: S,
}

impl<S: Service> UpnpService<S> {
    pub fn new(service: S) -> Self {
        let actions = Arc::new(S::actions());
        Self {
            actions,
            s: service,
        }
    }

    pub fn find_action(&self, name: &str) -> Result<&Action, ActionError> {
        Ok(self
            .actions
            .iter()
            .find(|a| a.name() == name)
            .ok_or(ActionErrorCode::InvalidAction)?)
    }

    pub fn input_scanner<'a>(
        &'a self,
        name: &str,
        input: Vec<InArgumentPayload<'a>>,
    ) -> Result<ArgumentScanner<'a>, ActionError> {
        let action = self.find_action(name)?;
        Ok(action.input_scanner(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::InArgumentPayload;

    #[test]
    fn scanner_rejects_out_of_order_arguments() {
        let payload = vec![InArgumentPayload {
            name: "Wrong".into(),
            value: "1".into(),
        }];
        let mut scanner = ArgumentScanner::new(payload, vec!["ObjectID"]);
        let result: Result<String, ActionError> = scanner.next();
        assert!(result.is_err());
    }

    #[test]
    fn scanner_reads_expected_arguments_in_order() {
        let payload = vec![
            InArgumentPayload {
                name: "ObjectID".into(),
                value: "0".into(),
            },
            InArgumentPayload {
                name: "StartingIndex".into(),
                value: "10".into(),
            },
        ];
        let mut scanner = ArgumentScanner::new(payload, vec!["ObjectID", "StartingIndex"]);
        let object_id: String = scanner.next().unwrap();
        let starting_index: u32 = scanner.next().unwrap();
        assert_eq!(object_id, "0");
        assert_eq!(starting_index, 10);
    }
}
