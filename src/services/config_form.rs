//! Configuration validator and the editable form that feeds it

use crate::domain::{ConfigField, Configuration};

/// Rates at or below this many milliseconds are rejected
pub const MIN_RATE_MS: u64 = 1000;

/// Local, field-level rejection; never reaches the network
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Only numbers are allowed.")]
    NonNumeric { field: ConfigField },

    #[error("All fields are required.")]
    MissingField { field: ConfigField },

    #[error("{} is too large.", .field.label())]
    OutOfRange { field: ConfigField },

    #[error("Ticket Release Rate must be greater than 1000 ms.")]
    ReleaseRateTooLow,

    #[error("Customer Retrieval Rate must be greater than 1000 ms.")]
    RetrievalRateTooLow,

    #[error("Max Ticket Capacity cannot exceed Total Tickets.")]
    CapacityExceedsTotal,
}

impl ValidationError {
    /// The field the message should be shown next to
    pub fn field(&self) -> ConfigField {
        match self {
            ValidationError::NonNumeric { field }
            | ValidationError::MissingField { field }
            | ValidationError::OutOfRange { field } => *field,
            ValidationError::ReleaseRateTooLow => ConfigField::TicketReleaseRate,
            ValidationError::RetrievalRateTooLow => ConfigField::CustomerRetrievalRate,
            ValidationError::CapacityExceedsTotal => ConfigField::MaxTicketCapacity,
        }
    }
}

fn is_digits(raw: &str) -> bool {
    raw.bytes().all(|b| b.is_ascii_digit())
}

/// Validate four raw field values (form order) into a `Configuration`.
///
/// Checks run in a fixed order: empty fields, non-digit content, range, release
/// rate, retrieval rate, then capacity against total.
pub fn validate(raw: [&str; 4]) -> Result<Configuration, ValidationError> {
    if let Some(field) = ConfigField::ALL.into_iter().find(|f| raw[f.index()].is_empty()) {
        return Err(ValidationError::MissingField { field });
    }

    let mut values = [0u64; 4];
    for field in ConfigField::ALL {
        let text = raw[field.index()];
        if !is_digits(text) {
            return Err(ValidationError::NonNumeric { field });
        }
        values[field.index()] =
            text.parse::<u64>().map_err(|_| ValidationError::OutOfRange { field })?;
    }

    let [total, release, retrieval, capacity] = values;
    if release <= MIN_RATE_MS {
        return Err(ValidationError::ReleaseRateTooLow);
    }
    if retrieval <= MIN_RATE_MS {
        return Err(ValidationError::RetrievalRateTooLow);
    }
    if capacity > total {
        return Err(ValidationError::CapacityExceedsTotal);
    }

    Ok(Configuration::new(total, release, retrieval, capacity))
}

/// Editable configuration form state
///
/// Keystrokes are filtered to digits; `begin_submit`/`finish_submit` bracket a
/// configure round trip so a second submit while one is in flight does nothing.
#[derive(Debug, Default)]
pub struct ConfigForm {
    values: [String; 4],
    focus: usize,
    error: Option<ValidationError>,
    submitting: bool,
}

impl ConfigForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, field: ConfigField) -> &str {
        &self.values[field.index()]
    }

    pub fn focus(&self) -> ConfigField {
        ConfigField::ALL[self.focus]
    }

    pub fn focus_next(&mut self) {
        self.focus = (self.focus + 1) % ConfigField::ALL.len();
    }

    pub fn focus_prev(&mut self) {
        self.focus = (self.focus + ConfigField::ALL.len() - 1) % ConfigField::ALL.len();
    }

    /// Type one character into the focused field.
    ///
    /// A non-digit leaves the field unchanged and sets the inline error.
    pub fn input_char(&mut self, c: char) -> Result<(), ValidationError> {
        if !c.is_ascii_digit() {
            let err = ValidationError::NonNumeric { field: self.focus() };
            self.error = Some(err.clone());
            return Err(err);
        }
        self.values[self.focus].push(c);
        self.error = None;
        Ok(())
    }

    /// Replace a field's whole value (paste); rejected unless every character is a digit
    pub fn set_value(&mut self, field: ConfigField, raw: &str) -> Result<(), ValidationError> {
        if !is_digits(raw) {
            let err = ValidationError::NonNumeric { field };
            self.error = Some(err.clone());
            return Err(err);
        }
        self.values[field.index()] = raw.to_string();
        self.error = None;
        Ok(())
    }

    pub fn backspace(&mut self) {
        self.values[self.focus].pop();
        self.error = None;
    }

    /// Inline error from the last keystroke or submit
    pub fn error(&self) -> Option<&ValidationError> {
        self.error.as_ref()
    }

    /// True while a configure request is in flight; the submit action is disabled
    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Validate and mark the form as submitting.
    ///
    /// Returns `None` when a submission is already in flight. A validation
    /// failure completes the attempt immediately.
    pub fn begin_submit(&mut self) -> Option<Result<Configuration, ValidationError>> {
        if self.submitting {
            return None;
        }
        let raw = [
            self.values[0].as_str(),
            self.values[1].as_str(),
            self.values[2].as_str(),
            self.values[3].as_str(),
        ];
        match validate(raw) {
            Ok(configuration) => {
                self.submitting = true;
                self.error = None;
                Some(Ok(configuration))
            }
            Err(e) => {
                self.error = Some(e.clone());
                Some(Err(e))
            }
        }
    }

    /// Re-enable submission after the configure round trip resolves
    pub fn finish_submit(&mut self) {
        self.submitting = false;
    }
}
