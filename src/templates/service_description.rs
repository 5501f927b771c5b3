use quick_xml::{
    events::{BytesStart, Event},
    Writer,
};

use crate::{
    action::Action, service_variables::StateVariableDescriptor, FromXml, IntoXml, XmlReaderExt,
};

use super::SpecVersion;

/// aka SCPD
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub spec_version: SpecVersion,
    pub variables: Vec<StateVariableDescriptor>,
    pub actions: Vec<Action>,
}

impl ServiceDescription {
    pub fn into_xml(&self) -> anyhow::Result<Vec<u8>> {
        let mut w = Writer::new(Vec::new());
        let parent = BytesStart::new("scpd");
        w.write_event(Event::Start(parent.to_owned()))?;

        w.write_serializable("specVersion", &self.spec_version)?;

        let action_list = BytesStart::new("actionList");
        w.write_event(Event::Start(action_list.to_owned()))?;
        for action in &self.actions {
            action.write_xml(&mut w)?;
        }
        w.write_event(Event::End(action_list.to_end()))?;

        let service_state_table = BytesStart::new("serviceStateTable");
        w.write_event(Event::Start(service_state_table.to_owned()))?;
        for variable in &self.variables {
            variable.write_xml(&mut w)?;
        }
        w.write_event(Event::End(service_state_table.to_end()))?;

        w.write_event(Event::End(parent.to_end()))?;
        Ok(w.into_inner())
    }
}

/// A parsed-down view of a remote service's SCPD document: just the action
/// names and their in/out argument names, in document order. The control
/// point dispatches actions generically and never needs the full
/// `StateVariableDescriptor` set the device side renders.
#[derive(Debug, Clone)]
pub struct Scpd {
    pub actions: Vec<ScpdAction>,
}

#[derive(Debug, Clone)]
pub struct ScpdAction {
    pub name: String,
    pub in_args: Vec<String>,
    pub out_args: Vec<String>,
}

impl Scpd {
    pub fn find_action(&self, name: &str) -> Option<&ScpdAction> {
        self.actions.iter().find(|a| a.name == name)
    }
}

impl<'a> FromXml<'a> for Scpd {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        use quick_xml::events::Event;

        let scpd_tag = r.read_to_start()?.into_owned();
        let mut actions = Vec::new();

        loop {
            let event = r.read_event_err_eof()?.into_owned();
            match event {
                Event::Start(tag) if tag.local_name().as_ref() == b"actionList" => {
                    let list_end = tag.to_end().into_owned();
                    loop {
                        let (empty, action_tag) = r.read_to_start_or_empty()?;
                        if action_tag.local_name().as_ref() != b"action" {
                            continue;
                        }
                        if empty {
                            continue;
                        }
                        actions.push(read_action(r)?);
                        let next = r.read_event_err_eof()?.into_owned();
                        if let Event::End(end) = next {
                            if end == list_end {
                                break;
                            }
                        }
                    }
                }
                Event::Start(tag) if tag.local_name().as_ref() == b"serviceStateTable" => {
                    // Not needed for generic dispatch; skip to its matching end tag.
                    let end_name = tag.to_end().into_owned();
                    loop {
                        match r.read_event_err_eof()?.into_owned() {
                            Event::End(end) if end == end_name => break,
                            _ => continue,
                        }
                    }
                }
                Event::End(end) if end == scpd_tag.to_end() => break,
                _ => {}
            }
        }

        Ok(Self { actions })
    }
}

fn read_action<'a>(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<ScpdAction> {
    use quick_xml::events::Event;

    let mut name = None;
    let mut in_args = Vec::new();
    let mut out_args = Vec::new();

    loop {
        let event = r.read_event_err_eof()?.into_owned();
        match event {
            Event::Start(tag) if tag.local_name().as_ref() == b"name" => {
                name = Some(r.read_text(tag.name())?.to_string());
            }
            Event::Start(tag) if tag.local_name().as_ref() == b"argumentList" => {
                let list_end = tag.to_end().into_owned();
                loop {
                    match r.read_event_err_eof()?.into_owned() {
                        Event::Start(arg_tag) if arg_tag.local_name().as_ref() == b"argument" => {
                            let (arg_name, direction) = read_argument(r)?;
                            match direction.as_str() {
                                "out" => out_args.push(arg_name),
                                _ => in_args.push(arg_name),
                            }
                        }
                        Event::End(end) if end == list_end => break,
                        _ => continue,
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"action" => break,
            _ => {}
        }
    }

    Ok(ScpdAction {
        name: name.ok_or_else(|| anyhow::anyhow!("action missing name"))?,
        in_args,
        out_args,
    })
}

fn read_argument<'a>(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<(String, String)> {
    use quick_xml::events::Event;

    let mut name = None;
    let mut direction = None;

    loop {
        let event = r.read_event_err_eof()?.into_owned();
        match event {
            Event::Start(tag) if tag.local_name().as_ref() == b"name" => {
                name = Some(r.read_text(tag.name())?.to_string());
            }
            Event::Start(tag) if tag.local_name().as_ref() == b"direction" => {
                direction = Some(r.read_text(tag.name())?.to_string());
            }
            Event::Start(tag) if tag.local_name().as_ref() == b"relatedStateVariable" => {
                r.read_text(tag.name())?;
            }
            Event::End(end) if end.local_name().as_ref() == b"argument" => break,
            _ => {}
        }
    }

    Ok((
        name.ok_or_else(|| anyhow::anyhow!("argument missing name"))?,
        direction.unwrap_or_else(|| "in".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action_list_in_out_args() {
        let raw = br#"<scpd>
<specVersion><major>1</major><minor>0</minor></specVersion>
<actionList>
<action>
<name>Browse</name>
<argumentList>
<argument><name>ObjectID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_ObjectID</relatedStateVariable></argument>
<argument><name>Result</name><direction>out</direction><relatedStateVariable>A_ARG_TYPE_Result</relatedStateVariable></argument>
</argumentList>
</action>
</actionList>
<serviceStateTable>
<stateVariable><name>A_ARG_TYPE_ObjectID</name></stateVariable>
</serviceStateTable>
</scpd>"#;
        let scpd = Scpd::read_xml(&mut quick_xml::Reader::from_reader(raw.as_slice())).unwrap();
        let browse = scpd.find_action("Browse").unwrap();
        assert_eq!(browse.in_args, vec!["ObjectID".to_string()]);
        assert_eq!(browse.out_args, vec!["Result".to_string()]);
    }
}
