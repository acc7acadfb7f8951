//! Eventables: the edges of the state-flow graph
//!
//! An [`Eventable`] records one user interaction (an event fired on an element)
//! together with the states it connects. Its endpoints start unset while the
//! event is being fired and are frozen once bound.

use crate::state::{Identification, StateId};
use crate::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of event fired on an element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Click,
    Hover,
    Submit,
    Custom(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click => write!(f, "click"),
            Self::Hover => write!(f, "hover"),
            Self::Submit => write!(f, "submit"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A value to enter into a form field before an event is fired
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormInput {
    pub identification: Identification,
    pub value: String,
}

impl FormInput {
    pub fn new(identification: Identification, value: impl Into<String>) -> Self {
        Self {
            identification,
            value: value.into(),
        }
    }
}

/// Snapshot of the element an event was fired on, kept for reports and plugins
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Uppercase tag name
    pub tag: String,
    /// Trimmed text content
    pub text: String,
    pub attributes: BTreeMap<String, String>,
}

/// Identity of an edge: two edges with equal keys are the same transition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub source: StateId,
    pub target: StateId,
    pub identification: Identification,
    pub event_type: EventType,
    pub related_frame: String,
}

/// An event fired on an element, optionally bound to its source and target states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eventable {
    source: Option<StateId>,
    target: Option<StateId>,
    identification: Identification,
    event_type: EventType,
    related_frame: String,
    form_inputs: Vec<FormInput>,
    element: Option<ElementInfo>,
}

impl Eventable {
    /// Creates an unbound eventable
    pub fn new(identification: Identification, event_type: EventType) -> Self {
        Self {
            source: None,
            target: None,
            identification,
            event_type,
            related_frame: String::new(),
            form_inputs: Vec::new(),
            element: None,
        }
    }

    pub fn with_related_frame(mut self, frame: impl Into<String>) -> Self {
        self.related_frame = frame.into();
        self
    }

    pub fn with_form_inputs(mut self, inputs: Vec<FormInput>) -> Self {
        self.form_inputs = inputs;
        self
    }

    pub fn with_element(mut self, element: ElementInfo) -> Self {
        self.element = Some(element);
        self
    }

    /// Sets both endpoints
    ///
    /// Binding is allowed once; re-binding to the same endpoints is a no-op and
    /// any other re-binding fails with [`FlowError::EdgeFrozen`].
    pub fn bind(&mut self, source: StateId, target: StateId) -> Result<(), FlowError> {
        match (self.source, self.target) {
            (None, None) => {
                self.source = Some(source);
                self.target = Some(target);
                Ok(())
            }
            (Some(s), Some(t)) if s == source && t == target => Ok(()),
            _ => Err(FlowError::EdgeFrozen(format!(
                "{} already bound, refusing {} -> {}",
                self, source, target
            ))),
        }
    }

    /// Returns a bound copy of this eventable
    pub fn bound(mut self, source: StateId, target: StateId) -> Result<Self, FlowError> {
        self.bind(source, target)?;
        Ok(self)
    }

    pub fn source(&self) -> Option<StateId> {
        self.source
    }

    pub fn target(&self) -> Option<StateId> {
        self.target
    }

    pub fn is_bound(&self) -> bool {
        self.source.is_some() && self.target.is_some()
    }

    pub fn identification(&self) -> &Identification {
        &self.identification
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn related_frame(&self) -> &str {
        &self.related_frame
    }

    pub fn form_inputs(&self) -> &[FormInput] {
        &self.form_inputs
    }

    pub fn element(&self) -> Option<&ElementInfo> {
        self.element.as_ref()
    }

    /// Returns the edge identity, or `None` while unbound
    pub fn edge_key(&self) -> Option<EdgeKey> {
        Some(EdgeKey {
            source: self.source?,
            target: self.target?,
            identification: self.identification.clone(),
            event_type: self.event_type.clone(),
            related_frame: self.related_frame.clone(),
        })
    }
}

impl fmt::Display for Eventable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.event_type, self.identification)?;
        if !self.related_frame.is_empty() {
            write!(f, " in frame {}", self.related_frame)?;
        }
        Ok(())
    }
}
