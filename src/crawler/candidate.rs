//! Candidate elements: the actions a crawler may fire from a state

use crate::state::{ElementInfo, EventType, Eventable, FormInput, Identification};
use std::fmt;

/// Identity of a candidate within one state's queue
///
/// Two candidates with the same key are the same action; the element snapshot
/// is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    identification: Identification,
    event_type: EventType,
    related_frame: String,
    form_inputs: Vec<FormInput>,
}

/// A DOM element the crawl rules deem firable at a particular state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateElement {
    identification: Identification,
    event_type: EventType,
    related_frame: String,
    form_inputs: Vec<FormInput>,
    element: ElementInfo,
}

impl CandidateElement {
    pub fn new(identification: Identification, event_type: EventType) -> Self {
        Self {
            identification,
            event_type,
            related_frame: String::new(),
            form_inputs: Vec::new(),
            element: ElementInfo::default(),
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
        self.element = element;
        self
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

    pub fn element(&self) -> &ElementInfo {
        &self.element
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey {
            identification: self.identification.clone(),
            event_type: self.event_type.clone(),
            related_frame: self.related_frame.clone(),
            form_inputs: self.form_inputs.clone(),
        }
    }

    /// Element signature used by click-once: the same element in any state
    /// has the same signature
    pub fn signature(&self) -> String {
        let attributes: Vec<String> = self
            .element
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!(
            "{}|{}|{}|{}|{}",
            self.related_frame,
            self.identification.value,
            self.element.tag,
            self.element.text,
            attributes.join(",")
        )
    }

    /// Builds the unbound eventable that firing this candidate produces
    pub fn to_eventable(&self) -> Eventable {
        Eventable::new(self.identification.clone(), self.event_type.clone())
            .with_related_frame(self.related_frame.clone())
            .with_form_inputs(self.form_inputs.clone())
            .with_element(self.element.clone())
    }
}

impl fmt::Display for CandidateElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.event_type, self.identification)?;
        if !self.related_frame.is_empty() {
            write!(f, " in frame {}", self.related_frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::How;

    fn anchor(xpath: &str, text: &str) -> CandidateElement {
        CandidateElement::new(Identification::xpath(xpath), EventType::Click).with_element(
            ElementInfo {
                tag: "A".into(),
                text: text.into(),
                attributes: [("href".to_string(), "#".to_string())].into_iter().collect(),
            },
        )
    }

    #[test]
    fn test_key_ignores_element_snapshot() {
        let a = anchor("/HTML[1]/BODY[1]/A[1]", "One");
        let b = anchor("/HTML[1]/BODY[1]/A[1]", "Changed");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_key_includes_form_inputs() {
        let plain = anchor("//BUTTON[1]", "Go");
        let filled = plain
            .clone()
            .with_form_inputs(vec![FormInput::new(Identification::new(How::Id, "q"), "x")]);
        assert_ne!(plain.key(), filled.key());
    }

    #[test]
    fn test_to_eventable_carries_everything() {
        let candidate = anchor("//A[1]", "One").with_related_frame("menu");
        let eventable = candidate.to_eventable();
        assert!(!eventable.is_bound());
        assert_eq!(eventable.related_frame(), "menu");
        assert_eq!(eventable.element().map(|e| e.text.as_str()), Some("One"));
        assert_eq!(candidate.to_string(), "click on xpath //A[1] in frame menu");
    }
}
