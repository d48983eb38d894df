//! Command specifications: one bus request and the layout of its response

use crate::channel::FlowControlOpts;
use crate::field::{Derivation, FieldSpec};
use crate::layout::{LayoutError, LayoutResult};

/// One request/response pair (or a block of computed fields)
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandSpec {
    /// Service ID and identifier bytes to send. Empty for computed blocks
    #[cfg_attr(feature = "serde", serde(default, with = "crate::config::hex_bytes"))]
    pub command: Vec<u8>,
    /// CAN ID the ECU answers on
    #[cfg_attr(feature = "serde", serde(default))]
    pub rx_id: u32,
    /// CAN ID the ECU listens on
    #[cfg_attr(feature = "serde", serde(default))]
    pub tx_id: u32,
    /// Skip the command's fields instead of failing when the ECU does not answer
    #[cfg_attr(feature = "serde", serde(default))]
    pub optional: bool,
    /// The ECU appends an unknown number of trailing bytes, learnt from the first response
    #[cfg_attr(feature = "serde", serde(default))]
    pub autopad: bool,
    /// The response is the echoed request followed by one variable width integer
    #[cfg_attr(feature = "serde", serde(default))]
    pub simple: bool,
    /// No request is sent. Fields are derived from the record after all requests
    #[cfg_attr(feature = "serde", serde(default))]
    pub computed: bool,
    /// Transport tuning passed to the channel as-is
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub flow_control: Option<FlowControlOpts>,
    /// Fields in wire order (or evaluation order for computed blocks)
    pub fields: Vec<FieldSpec>,
}

impl CommandSpec {
    /// Creates a request command
    pub fn new(command: &[u8], rx_id: u32, tx_id: u32) -> Self {
        Self {
            command: command.to_vec(),
            rx_id,
            tx_id,
            ..Default::default()
        }
    }

    /// Creates a block of computed fields
    pub fn computed(fields: Vec<FieldSpec>) -> Self {
        Self {
            computed: true,
            fields,
            ..Default::default()
        }
    }

    /// Marks the command optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Enables trailing padding learning
    pub fn autopad(mut self) -> Self {
        self.autopad = true;
        self
    }

    /// Marks the command as a simple variable width read
    pub fn simple(mut self) -> Self {
        self.simple = true;
        self
    }

    /// Sets ISO-TP flow control options
    pub fn flow_control(mut self, fc: FlowControlOpts) -> Self {
        self.flow_control = Some(fc);
        self
    }

    /// Appends a field
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends several fields
    pub fn fields<I: IntoIterator<Item = FieldSpec>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    /// True if any field uses a Torque style position
    pub fn uses_positions(&self) -> bool {
        self.fields.iter().any(|f| f.position.is_some())
    }

    /// True if the fields are Torque formulas over the whole response
    pub fn uses_formulas(&self) -> bool {
        self.fields
            .iter()
            .any(|f| matches!(f.derive, Some(Derivation::Frame(_))))
    }

    /// Printable label used in logs and errors
    pub fn label(&self) -> String {
        if self.computed {
            "<computed>".to_string()
        } else {
            format!("{:02X?}@{:03X}", self.command, self.tx_id)
        }
    }

    /// Construction time checks of the command and all of its fields
    pub fn validate(&self) -> LayoutResult<()> {
        let label = self.label();
        for f in &self.fields {
            f.validate()?;
        }
        if self.computed {
            if self.simple || self.autopad || self.optional {
                return Err(LayoutError::ConflictingFlags(label));
            }
            for f in &self.fields {
                match (&f.name, &f.derive) {
                    (Some(_), Some(Derivation::Record(_))) if f.repeat_count == 1 => {}
                    (Some(n), _) => return Err(LayoutError::ComputedWithoutRule(n.clone())),
                    (None, _) => return Err(LayoutError::UnnamedField),
                }
            }
            return Ok(());
        }

        if self.command.is_empty() {
            return Err(LayoutError::EmptyCommand(label));
        }
        if let Some(f) = self
            .fields
            .iter()
            .find(|f| matches!(f.derive, Some(Derivation::Record(_))))
        {
            return Err(LayoutError::RecordRuleOutsideComputed(
                f.name.clone().unwrap_or_default(),
            ));
        }
        if self.simple {
            let named: Vec<&FieldSpec> = self.fields.iter().filter(|f| !f.is_padding()).collect();
            if named.len() != 1 || named.len() != self.fields.len() || self.autopad {
                return Err(LayoutError::ConflictingFlags(label));
            }
            if named[0].derive.is_some() || named[0].repeat_count != 1 {
                return Err(LayoutError::ConflictingFlags(label));
            }
        }
        if self.uses_formulas() {
            let all_formulas = self.fields.iter().all(|f| {
                !f.is_padding() && matches!(f.derive, Some(Derivation::Frame(_)))
            });
            if !all_formulas || self.simple || self.autopad {
                return Err(LayoutError::ConflictingFlags(label));
            }
        }
        if self.uses_positions() {
            if let Some(f) = self.fields.iter().find(|f| f.position.is_none()) {
                return Err(LayoutError::MixedAddressing {
                    command: label,
                    field: f.name.clone().unwrap_or_else(|| "<padding>".into()),
                });
            }
        }
        Ok(())
    }
}
