//! Service Control Protocol Description model.
//!
//! The service state table is an arena: [`FormalArgument`]s reference state
//! variables through [`VarId`] indices instead of shared pointers, which
//! keeps the model acyclic and makes [`Scpd::add_action`] validation an
//! index membership check.

use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};

use crate::{FromXml, IntoXml, XmlReaderExt, XmlWriter};

pub const SCPD_XMLNS: &str = "urn:schemas-upnp-org:service-1-0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecVersion {
    pub major: u8,
    pub minor: u8,
}

impl SpecVersion {
    pub const fn upnp_v1_1() -> Self {
        Self { major: 1, minor: 1 }
    }
    pub const fn upnp_v2_0() -> Self {
        Self { major: 2, minor: 0 }
    }
}

impl IntoXml for SpecVersion {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("specVersion");
        w.write_event(Event::Start(parent.clone())).map_err(std::io::Error::other)?;
        w.create_element("major")
            .write_text_content(BytesText::new(&self.major.to_string())).map_err(std::io::Error::other)?;
        w.create_element("minor")
            .write_text_content(BytesText::new(&self.minor.to_string())).map_err(std::io::Error::other)?;
        w.write_event(Event::End(parent.to_end())).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl<'a> FromXml<'a> for SpecVersion {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let parent = r.read_to_start()?.into_owned();
        anyhow::ensure!(parent.local_name().as_ref() == b"specVersion");
        read_spec_version_body(r)
    }
}

/// UPnP basic data types a state variable can carry.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
    Ui1,
    Ui2,
    Ui4,
    I1,
    I2,
    I4,
    Int,
    R4,
    R8,
    Char,
    #[default]
    String,
    Date,
    DateTime,
    Boolean,
    Uri,
    Uuid,
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Ui1 => "ui1",
            DataType::Ui2 => "ui2",
            DataType::Ui4 => "ui4",
            DataType::I1 => "i1",
            DataType::I2 => "i2",
            DataType::I4 => "i4",
            DataType::Int => "int",
            DataType::R4 => "r4",
            DataType::R8 => "r8",
            DataType::Char => "char",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::Boolean => "boolean",
            DataType::Uri => "uri",
            DataType::Uuid => "uuid",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ui1" => Ok(DataType::Ui1),
            "ui2" => Ok(DataType::Ui2),
            "ui4" => Ok(DataType::Ui4),
            "i1" => Ok(DataType::I1),
            "i2" => Ok(DataType::I2),
            "i4" => Ok(DataType::I4),
            "int" => Ok(DataType::Int),
            "r4" => Ok(DataType::R4),
            "r8" => Ok(DataType::R8),
            "char" => Ok(DataType::Char),
            "string" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            "dateTime" => Ok(DataType::DateTime),
            "boolean" => Ok(DataType::Boolean),
            "uri" => Ok(DataType::Uri),
            "uuid" => Ok(DataType::Uuid),
            data_type => Err(anyhow::anyhow!("unrecognized data type: {data_type}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub minimum: i64,
    pub maximum: i64,
    pub step: Option<i64>,
}

impl IntoXml for ValueRange {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("allowedValueRange");
        w.write_event(Event::Start(parent.clone())).map_err(std::io::Error::other)?;
        w.create_element("minimum")
            .write_text_content(BytesText::new(&self.minimum.to_string())).map_err(std::io::Error::other)?;
        w.create_element("maximum")
            .write_text_content(BytesText::new(&self.maximum.to_string())).map_err(std::io::Error::other)?;
        if let Some(step) = self.step {
            w.create_element("step")
                .write_text_content(BytesText::new(&step.to_string())).map_err(std::io::Error::other)?;
        }
        w.write_event(Event::End(parent.to_end()))
            .map_err(std::io::Error::other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub data_type: DataType,
    pub default_value: Option<String>,
    /// A variable is evented iff this is set.
    pub send_events: bool,
    /// Candidate for the multicast eventing path.
    pub multicast: bool,
    pub allowed_range: Option<ValueRange>,
    pub allowed_values: Vec<String>,
}

impl StateVariable {
    pub fn evented(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default_value: None,
            send_events: true,
            multicast: false,
            allowed_range: None,
            allowed_values: Vec::new(),
        }
    }

    pub fn plain(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            send_events: false,
            ..Self::evented(name, data_type)
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl IntoXml for StateVariable {
    fn write_xml(&self, w: &mut XmlWriter) -> std::io::Result<()> {
        let parent = BytesStart::new("stateVariable").with_attributes([
            ("sendEvents", yes_no(self.send_events)),
            ("multicast", yes_no(self.multicast)),
        ]);
        w.write_event(Event::Start(parent.clone())).map_err(std::io::Error::other)?;
        w.create_element("name")
            .write_text_content(BytesText::new(&self.name)).map_err(std::io::Error::other)?;
        w.create_element("dataType")
            .write_text_content(BytesText::new(&self.data_type.to_string())).map_err(std::io::Error::other)?;
        if let Some(default_value) = &self.default_value {
            w.create_element("defaultValue")
                .write_text_content(BytesText::new(default_value)).map_err(std::io::Error::other)?;
        }
        if let Some(range) = self.allowed_range {
            range.write_xml(w)?;
        }
        if !self.allowed_values.is_empty() {
            w.create_element("allowedValueList")
                .write_inner_content(|w| {
                    for value in &self.allowed_values {
                        w.create_element("allowedValue")
                            .write_text_content(BytesText::new(value))?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })
                .map_err(std::io::Error::other)?;
        }
        w.write_event(Event::End(parent.to_end())).map_err(std::io::Error::other)?;
        Ok(())
    }
}

/// Index of a state variable inside its service state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            _ => Err(anyhow::anyhow!("expected in or out, got {s}")),
        }
    }
}

impl From<Direction> for &str {
    fn from(value: Direction) -> Self {
        match value {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalArgument {
    pub name: String,
    pub direction: Direction,
    pub related_variable: VarId,
}

impl FormalArgument {
    pub fn input(name: impl Into<String>, related_variable: VarId) -> Self {
        Self {
            name: name.into(),
            direction: Direction::In,
            related_variable,
        }
    }

    pub fn output(name: impl Into<String>, related_variable: VarId) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Out,
            related_variable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalAction {
    pub name: String,
    pub arguments: Vec<FormalArgument>,
}

impl FormalAction {
    pub fn new(name: impl Into<String>, arguments: Vec<FormalArgument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn in_arguments(&self) -> impl Iterator<Item = &FormalArgument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::In)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &FormalArgument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Out)
    }
}

/// Service Control Protocol Description: the service state table plus an
/// append-only list of formal actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scpd {
    pub spec_version: SpecVersion,
    state_table: Vec<StateVariable>,
    action_list: Vec<FormalAction>,
}

impl Default for SpecVersion {
    fn default() -> Self {
        Self::upnp_v1_1()
    }
}

impl Scpd {
    pub fn new(spec_version: SpecVersion) -> Self {
        Self {
            spec_version,
            state_table: Vec::new(),
            action_list: Vec::new(),
        }
    }

    pub fn add_state_variable(&mut self, variable: StateVariable) -> VarId {
        self.state_table.push(variable);
        VarId(self.state_table.len() - 1)
    }

    /// Appends the action. Fails, leaving the description untouched, when
    /// any argument references a variable outside the state table.
    pub fn add_action(&mut self, action: FormalAction) -> anyhow::Result<()> {
        for argument in &action.arguments {
            anyhow::ensure!(
                argument.related_variable.0 < self.state_table.len(),
                "state variable not found for argument {}",
                argument.name
            );
        }
        self.action_list.push(action);
        Ok(())
    }

    pub fn actions(&self) -> &[FormalAction] {
        &self.action_list
    }

    pub fn find_action(&self, name: &str) -> Option<&FormalAction> {
        self.action_list.iter().find(|a| a.name == name)
    }

    pub fn state_table(&self) -> &[StateVariable] {
        &self.state_table
    }

    pub fn state_variable(&self, id: VarId) -> Option<&StateVariable> {
        self.state_table.get(id.0)
    }

    pub fn state_variable_named(&self, name: &str) -> Option<(VarId, &StateVariable)> {
        self.state_table
            .iter()
            .position(|v| v.name == name)
            .map(|idx| (VarId(idx), &self.state_table[idx]))
    }

    fn write_action(&self, w: &mut XmlWriter, action: &FormalAction) -> std::io::Result<()> {
        let parent = BytesStart::new("action");
        w.write_event(Event::Start(parent.clone())).map_err(std::io::Error::other)?;
        w.create_element("name")
            .write_text_content(BytesText::new(&action.name)).map_err(std::io::Error::other)?;
        let argument_list = BytesStart::new("argumentList");
        w.write_event(Event::Start(argument_list.clone())).map_err(std::io::Error::other)?;
        for argument in &action.arguments {
            let related = self
                .state_variable(argument.related_variable)
                .expect("arguments validated on insertion");
            let arg = BytesStart::new("argument");
            w.write_event(Event::Start(arg.clone())).map_err(std::io::Error::other)?;
            w.create_element("name")
                .write_text_content(BytesText::new(&argument.name)).map_err(std::io::Error::other)?;
            w.create_element("direction")
                .write_text_content(BytesText::new(argument.direction.into())).map_err(std::io::Error::other)?;
            w.create_element("relatedStateVariable")
                .write_text_content(BytesText::new(&related.name)).map_err(std::io::Error::other)?;
            w.write_event(Event::End(arg.to_end())).map_err(std::io::Error::other)?;
        }
        w.write_event(Event::End(argument_list.to_end())).map_err(std::io::Error::other)?;
        w.write_event(Event::End(parent.to_end())).map_err(std::io::Error::other)?;
        Ok(())
    }

    /// Renders the full SCPD document.
    pub fn into_xml(&self) -> anyhow::Result<String> {
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        let root =
            BytesStart::new("scpd").with_attributes([("xmlns", SCPD_XMLNS), ("configId", "1")]);
        let root_end = root.to_end().into_owned();
        w.write_event(Event::Start(root))?;

        self.spec_version.write_xml(&mut w)?;

        let action_list = BytesStart::new("actionList");
        w.write_event(Event::Start(action_list.clone()))?;
        for action in &self.action_list {
            self.write_action(&mut w, action)?;
        }
        w.write_event(Event::End(action_list.to_end()))?;

        let state_table = BytesStart::new("serviceStateTable");
        w.write_event(Event::Start(state_table.clone()))?;
        for variable in &self.state_table {
            variable.write_xml(&mut w)?;
        }
        w.write_event(Event::End(state_table.to_end()))?;

        w.write_event(Event::End(root_end))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

/// Action as read from a remote SCPD, arguments still referencing variables
/// by name. Resolved into [`FormalAction`]s once the state table is known.
#[derive(Debug)]
struct RawAction {
    name: String,
    arguments: Vec<(String, Direction, String)>,
}

impl<'a> FromXml<'a> for Scpd {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let root = r.read_to_start()?.to_owned();
        anyhow::ensure!(root.local_name().as_ref() == b"scpd");

        let mut spec_version = None;
        let mut raw_actions = Vec::new();
        let mut state_table = Vec::new();

        loop {
            let event = r.read_event_err_eof()?.into_owned();
            match event {
                Event::Start(start) => match start.local_name().as_ref() {
                    b"specVersion" => {
                        // read_spec_version_body consumes up to </specVersion>
                        spec_version = Some(read_spec_version_body(r)?);
                    }
                    b"actionList" => raw_actions = read_action_list(r)?,
                    b"serviceStateTable" => state_table = read_state_table(r)?,
                    _ => {
                        r.read_to_end(start.name())?;
                    }
                },
                Event::End(end) if end.local_name().as_ref() == b"scpd" => break,
                _ => {}
            }
        }

        let mut scpd = Scpd::new(spec_version.context("scpd spec version")?);
        for variable in state_table {
            scpd.add_state_variable(variable);
        }
        for raw in raw_actions {
            let mut arguments = Vec::with_capacity(raw.arguments.len());
            for (name, direction, related) in raw.arguments {
                let (var_id, _) = scpd
                    .state_variable_named(&related)
                    .with_context(|| format!("related state variable {related} not in table"))?;
                arguments.push(FormalArgument {
                    name,
                    direction,
                    related_variable: var_id,
                });
            }
            scpd.add_action(FormalAction {
                name: raw.name,
                arguments,
            })?;
        }
        Ok(scpd)
    }
}

fn read_spec_version_body(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<SpecVersion> {
    let mut major = None;
    let mut minor = None;
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) => {
                let end = start.name();
                match start.local_name().as_ref() {
                    b"major" => major = Some(r.read_text(end)?.parse()?),
                    b"minor" => minor = Some(r.read_text(end)?.parse()?),
                    _ => {
                        r.read_to_end(end)?;
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"specVersion" => break,
            _ => {}
        }
    }
    Ok(SpecVersion {
        major: major.context("spec version major")?,
        minor: minor.context("spec version minor")?,
    })
}

fn read_action_list(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<Vec<RawAction>> {
    let mut actions = Vec::new();
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) if start.local_name().as_ref() == b"action" => {
                actions.push(read_action(r)?);
            }
            Event::End(end) if end.local_name().as_ref() == b"actionList" => break,
            Event::Text(_) => {}
            other => anyhow::bail!("expected action or list end, got {other:?}"),
        }
    }
    Ok(actions)
}

fn read_action(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<RawAction> {
    let mut name = None;
    let mut arguments = Vec::new();
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) => {
                let end = start.name();
                match start.local_name().as_ref() {
                    b"name" => name = Some(r.read_text(end)?.to_string()),
                    b"argumentList" => arguments = read_argument_list(r)?,
                    _ => {
                        r.read_to_end(end)?;
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"action" => break,
            _ => {}
        }
    }
    Ok(RawAction {
        name: name.context("action name")?,
        arguments,
    })
}

fn read_argument_list(
    r: &mut quick_xml::Reader<&[u8]>,
) -> anyhow::Result<Vec<(String, Direction, String)>> {
    let mut arguments = Vec::new();
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) if start.local_name().as_ref() == b"argument" => {
                let mut name = None;
                let mut direction = None;
                let mut related = None;
                loop {
                    match r.read_event_err_eof()?.into_owned() {
                        Event::Start(start) => {
                            let end = start.name();
                            match start.local_name().as_ref() {
                                b"name" => name = Some(r.read_text(end)?.to_string()),
                                b"direction" => {
                                    direction = Some(r.read_text(end)?.parse::<Direction>()?)
                                }
                                b"relatedStateVariable" => {
                                    related = Some(r.read_text(end)?.to_string())
                                }
                                _ => {
                                    r.read_to_end(end)?;
                                }
                            }
                        }
                        // <retval/> and friends
                        Event::Empty(_) => {}
                        Event::End(end) if end.local_name().as_ref() == b"argument" => break,
                        _ => {}
                    }
                }
                arguments.push((
                    name.context("argument name")?,
                    direction.context("argument direction")?,
                    related.context("argument related state variable")?,
                ));
            }
            Event::End(end) if end.local_name().as_ref() == b"argumentList" => break,
            Event::Text(_) => {}
            other => anyhow::bail!("expected argument or list end, got {other:?}"),
        }
    }
    Ok(arguments)
}

fn read_state_table(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<Vec<StateVariable>> {
    let mut variables = Vec::new();
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) if start.local_name().as_ref() == b"stateVariable" => {
                let mut send_events = true;
                let mut multicast = false;
                for attr in start.attributes().flatten() {
                    let value = attr.unescape_value()?;
                    match attr.key.local_name().as_ref() {
                        b"sendEvents" => send_events = value == "yes",
                        b"multicast" => multicast = value == "yes",
                        _ => {}
                    }
                }
                let mut variable = read_state_variable(r)?;
                variable.send_events = send_events;
                variable.multicast = multicast;
                variables.push(variable);
            }
            Event::End(end) if end.local_name().as_ref() == b"serviceStateTable" => break,
            Event::Text(_) => {}
            other => anyhow::bail!("expected state variable or table end, got {other:?}"),
        }
    }
    Ok(variables)
}

fn read_state_variable(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<StateVariable> {
    let mut name = None;
    let mut data_type = None;
    let mut default_value = None;
    let mut allowed_range = None;
    let mut allowed_values = Vec::new();
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) => {
                let end = start.name();
                match start.local_name().as_ref() {
                    b"name" => name = Some(r.read_text(end)?.to_string()),
                    b"dataType" => data_type = Some(r.read_text(end)?.parse::<DataType>()?),
                    b"defaultValue" => default_value = Some(r.read_text(end)?.to_string()),
                    b"allowedValueRange" => allowed_range = Some(read_value_range(r)?),
                    b"allowedValueList" => {
                        loop {
                            match r.read_event_err_eof()?.into_owned() {
                                Event::Start(start)
                                    if start.local_name().as_ref() == b"allowedValue" =>
                                {
                                    allowed_values
                                        .push(r.read_text(start.name())?.to_string());
                                }
                                Event::End(end)
                                    if end.local_name().as_ref() == b"allowedValueList" =>
                                {
                                    break
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {
                        r.read_to_end(end)?;
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"stateVariable" => break,
            _ => {}
        }
    }
    Ok(StateVariable {
        name: name.context("state variable name")?,
        data_type: data_type.unwrap_or_default(),
        default_value,
        send_events: true,
        multicast: false,
        allowed_range,
        allowed_values,
    })
}

fn read_value_range(r: &mut quick_xml::Reader<&[u8]>) -> anyhow::Result<ValueRange> {
    let mut minimum = None;
    let mut maximum = None;
    let mut step = None;
    loop {
        match r.read_event_err_eof()?.into_owned() {
            Event::Start(start) => {
                let end = start.name();
                match start.local_name().as_ref() {
                    b"minimum" => minimum = Some(r.read_text(end)?.parse()?),
                    b"maximum" => maximum = Some(r.read_text(end)?.parse()?),
                    b"step" => step = Some(r.read_text(end)?.parse()?),
                    _ => {
                        r.read_to_end(end)?;
                    }
                }
            }
            Event::End(end) if end.local_name().as_ref() == b"allowedValueRange" => break,
            _ => {}
        }
    }
    Ok(ValueRange {
        minimum: minimum.context("range minimum")?,
        maximum: maximum.context("range maximum")?,
        step,
    })
}

#[cfg(test)]
mod tests {
    use crate::FromXml;

    use super::{
        DataType, Direction, FormalAction, FormalArgument, Scpd, SpecVersion, StateVariable,
    };

    fn switch_power_scpd() -> Scpd {
        let mut scpd = Scpd::new(SpecVersion::upnp_v1_1());
        let state = scpd.add_state_variable(
            StateVariable::evented("actualState", DataType::String).with_default("0"),
        );
        scpd.add_action(FormalAction::new(
            "Turn",
            vec![
                FormalArgument::input("StateValue", state),
                FormalArgument::output("ActualValue", state),
            ],
        ))
        .unwrap();
        scpd
    }

    #[test]
    fn add_action_rejects_foreign_state_variable() {
        let mut scratch = Scpd::new(SpecVersion::upnp_v1_1());
        scratch.add_state_variable(StateVariable::plain("first", DataType::String));
        let foreign = scratch.add_state_variable(StateVariable::plain("second", DataType::String));

        // The switch power table has a single variable, so an id minted from
        // the two-entry scratch table is out of range for it.
        let mut scpd = switch_power_scpd();
        let before = scpd.clone();
        let action = FormalAction::new("Broken", vec![FormalArgument::input("X", foreign)]);
        assert!(scpd.add_action(action).is_err());
        assert_eq!(scpd, before);
    }

    #[test]
    fn scpd_xml_round_trip() {
        let scpd = switch_power_scpd();
        let xml = scpd.into_xml().unwrap();
        assert!(xml.contains("<scpd xmlns=\"urn:schemas-upnp-org:service-1-0\" configId=\"1\">"));
        assert!(xml.contains("<relatedStateVariable>actualState</relatedStateVariable>"));
        assert!(xml.contains("sendEvents=\"yes\""));

        let parsed = Scpd::read_xml(&mut quick_xml::Reader::from_str(&xml)).unwrap();
        assert_eq!(parsed, scpd);
    }

    #[test]
    fn parses_real_world_scpd() {
        let raw = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0" configId="1">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <actionList>
    <action>
      <name>SetTarget</name>
      <argumentList>
        <argument>
          <name>newTargetValue</name>
          <direction>in</direction>
          <retval/>
          <relatedStateVariable>Target</relatedStateVariable>
        </argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>Target</name>
      <dataType>boolean</dataType>
      <defaultValue>0</defaultValue>
    </stateVariable>
    <stateVariable sendEvents="yes" multicast="no">
      <name>Status</name>
      <dataType>boolean</dataType>
      <allowedValueRange><minimum>0</minimum><maximum>1</maximum></allowedValueRange>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;
        let scpd = Scpd::read_xml(&mut quick_xml::Reader::from_str(raw)).unwrap();
        assert_eq!(scpd.actions().len(), 1);
        let action = scpd.find_action("SetTarget").unwrap();
        let arg = action.in_arguments().next().unwrap();
        assert_eq!(arg.direction, Direction::In);
        let related = scpd.state_variable(arg.related_variable).unwrap();
        assert_eq!(related.name, "Target");
        assert!(!related.send_events);
        let status = scpd.state_variable_named("Status").unwrap().1;
        assert!(status.send_events);
        assert_eq!(status.allowed_range.unwrap().maximum, 1);
    }
}
