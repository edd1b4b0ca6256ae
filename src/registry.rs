//! Declarative lifecycle tables, one state machine per document type
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::error::{RegistryError, Result, WorkflowError};
use super::record::LineItem;
use super::side_effect::EffectKind;
use super::types::{DocumentType, FieldKind, FieldValue, Role};

pub const CANCEL_ACTION: &str = "cancel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
    /// Present when required, of the declared kind when present, and required text is not blank
    pub fn check(&self, fields: &BTreeMap<String, FieldValue>) -> Result<()> {
        match fields.get(&self.name) {
            None if self.required => Err(WorkflowError::validation(&self.name, "is required")),
            None => Ok(()),
            Some(value) if value.kind() != self.kind => Err(WorkflowError::validation(
                &self.name,
                format!("expected {:?}, got {:?}", self.kind, value.kind()),
            )),
            Some(FieldValue::Text(text)) if self.required && text.trim().is_empty() => {
                Err(WorkflowError::validation(&self.name, "must not be empty"))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Whether an action takes one quantity per line item, e.g. received or counted amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineQuantities {
    NotAccepted,
    Optional,
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub doc_type: DocumentType,
    pub source: String,
    pub action: String,
    pub target: String,
    pub required_role: Option<Role>,
    pub fields: Vec<FieldSpec>,
    pub line_quantities: LineQuantities,
    pub side_effect: Option<EffectKind>,
}

impl TransitionRule {
    pub fn permits(&self, role: Role) -> bool {
        self.required_role.is_none_or(|required| role.satisfies(required))
    }
}

/// A rule as declared, before it is bound to a document type
#[derive(Debug, Clone)]
pub struct Rule {
    source: String,
    action: String,
    target: String,
    required_role: Option<Role>,
    fields: Vec<FieldSpec>,
    line_quantities: LineQuantities,
    side_effect: Option<EffectKind>,
}

impl Rule {
    pub fn new(source: &str, action: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            required_role: None,
            fields: vec![],
            line_quantities: LineQuantities::NotAccepted,
            side_effect: None,
        }
    }
    pub fn role(mut self, role: Role) -> Self {
        self.required_role = Some(role);
        self
    }
    pub fn requires(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::required(name, kind));
        self
    }
    pub fn requires_text(self, name: &str) -> Self {
        self.requires(name, FieldKind::Text)
    }
    pub fn optional_text(mut self, name: &str) -> Self {
        self.fields.push(FieldSpec::optional(name, FieldKind::Text));
        self
    }
    pub fn line_quantities(mut self, policy: LineQuantities) -> Self {
        self.line_quantities = policy;
        self
    }
    pub fn increments(mut self) -> Self {
        self.side_effect = Some(EffectKind::Increment);
        self
    }
    pub fn decrements(mut self) -> Self {
        self.side_effect = Some(EffectKind::Decrement);
        self
    }

    fn bind(self, doc_type: DocumentType) -> TransitionRule {
        TransitionRule {
            doc_type,
            source: self.source,
            action: self.action,
            target: self.target,
            required_role: self.required_role,
            fields: self.fields,
            line_quantities: self.line_quantities,
            side_effect: self.side_effect,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    doc_type: DocumentType,
    initial: String,
    states: Vec<String>,
    terminal: BTreeSet<String>,
    rules: Vec<TransitionRule>, // declaration order
    index: HashMap<(String, String), usize>,
    creation_fields: Vec<FieldSpec>,
    requires_line_items: bool,
}

impl StateMachine {
    pub fn builder(doc_type: DocumentType) -> MachineBuilder {
        MachineBuilder {
            doc_type,
            states: vec![],
            initial: None,
            terminal: vec![],
            rules: vec![],
            cancel_to: None,
            creation_fields: vec![],
            requires_line_items: false,
        }
    }
    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }
    pub fn initial(&self) -> &str {
        &self.initial
    }
    pub fn states(&self) -> &[String] {
        &self.states
    }
    pub fn is_state(&self, status: &str) -> bool {
        self.states.iter().any(|s| s == status)
    }
    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal.contains(status)
    }
    pub fn rule(&self, status: &str, action: &str) -> Option<&TransitionRule> {
        self.index
            .get(&(status.to_string(), action.to_string()))
            .map(|&i| &self.rules[i])
    }
    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }
    pub fn rules_from<'a>(&'a self, status: &'a str) -> impl Iterator<Item = &'a TransitionRule> {
        self.rules.iter().filter(move |r| r.source == status)
    }
    /// Fields and line items a caller must supply to create a document of this type
    pub fn validate_creation(
        &self,
        fields: &BTreeMap<String, FieldValue>,
        line_items: &[LineItem],
    ) -> Result<()> {
        for spec in &self.creation_fields {
            spec.check(fields)?;
        }
        if self.requires_line_items && line_items.is_empty() {
            return Err(WorkflowError::validation("lineItems", "at least one line item is required"));
        }
        for (i, item) in line_items.iter().enumerate() {
            if item.resource_code.trim().is_empty() {
                return Err(WorkflowError::validation(
                    format!("lineItems[{i}].resourceCode"),
                    "must not be empty",
                ));
            }
            if item.quantity == 0 {
                return Err(WorkflowError::validation(
                    format!("lineItems[{i}].quantity"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

pub struct MachineBuilder {
    doc_type: DocumentType,
    states: Vec<String>,
    initial: Option<String>,
    terminal: Vec<String>,
    rules: Vec<Rule>,
    cancel_to: Option<String>,
    creation_fields: Vec<FieldSpec>,
    requires_line_items: bool,
}

impl MachineBuilder {
    pub fn states<const N: usize>(mut self, states: [&str; N]) -> Self {
        self.states.extend(states.iter().map(|s| s.to_string()));
        self
    }
    pub fn initial(mut self, status: &str) -> Self {
        self.initial = Some(status.to_string());
        self
    }
    pub fn terminal<const N: usize>(mut self, states: [&str; N]) -> Self {
        self.terminal.extend(states.iter().map(|s| s.to_string()));
        self
    }
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
    /// Adds `cancel` from every non-terminal state that does not already declare one
    pub fn cancellable_to(mut self, status: &str) -> Self {
        self.cancel_to = Some(status.to_string());
        self
    }
    pub fn creation_field(mut self, spec: FieldSpec) -> Self {
        self.creation_fields.push(spec);
        self
    }
    pub fn creation_text(self, name: &str) -> Self {
        self.creation_field(FieldSpec::required(name, FieldKind::Text))
    }
    pub fn requires_line_items(mut self) -> Self {
        self.requires_line_items = true;
        self
    }

    pub fn build(self) -> std::result::Result<StateMachine, RegistryError> {
        let doc_type = self.doc_type;
        let declared = |status: &str| -> std::result::Result<(), RegistryError> {
            if self.states.iter().any(|s| s == status) {
                Ok(())
            } else {
                Err(RegistryError::UnknownStatus {
                    doc_type,
                    status: status.to_string(),
                })
            }
        };

        let initial = self
            .initial
            .clone()
            .ok_or(RegistryError::MissingInitial(doc_type))?;
        declared(&initial)?;
        for status in &self.terminal {
            declared(status)?;
        }

        let mut rules: Vec<TransitionRule> =
            self.rules.iter().cloned().map(|r| r.bind(doc_type)).collect();

        if let Some(cancelled) = &self.cancel_to {
            declared(cancelled)?;
            for status in &self.states {
                let has_cancel = rules
                    .iter()
                    .any(|r| &r.source == status && r.action == CANCEL_ACTION);
                if !self.terminal.contains(status) && !has_cancel {
                    rules.push(Rule::new(status, CANCEL_ACTION, cancelled).bind(doc_type));
                }
            }
        }

        let mut index = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            declared(&rule.source)?;
            declared(&rule.target)?;
            if self.terminal.contains(&rule.source) {
                return Err(RegistryError::TerminalHasRule {
                    doc_type,
                    status: rule.source.clone(),
                });
            }
            let key = (rule.source.clone(), rule.action.clone());
            if index.insert(key, i).is_some() {
                return Err(RegistryError::DuplicateRule {
                    doc_type,
                    status: rule.source.clone(),
                    action: rule.action.clone(),
                });
            }
        }

        Ok(StateMachine {
            doc_type,
            initial,
            terminal: self.terminal.iter().cloned().collect(),
            states: self.states,
            rules,
            index,
            creation_fields: self.creation_fields,
            requires_line_items: self.requires_line_items,
        })
    }
}

/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    machines: HashMap<DocumentType, StateMachine>,
}

impl Registry {
    pub fn new(machines: Vec<StateMachine>) -> std::result::Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for machine in machines {
            let doc_type = machine.doc_type;
            if map.insert(doc_type, machine).is_some() {
                return Err(RegistryError::DuplicateMachine(doc_type));
            }
        }
        Ok(Self { machines: map })
    }

    pub fn machine(&self, doc_type: DocumentType) -> Result<&StateMachine> {
        self.machines.get(&doc_type).ok_or_else(|| {
            WorkflowError::validation("docType", format!("no lifecycle registered for {doc_type}"))
        })
    }

    pub fn rule(&self, doc_type: DocumentType, status: &str, action: &str) -> Option<&TransitionRule> {
        self.machines.get(&doc_type)?.rule(status, action)
    }

    /// Lifecycle tables for every built-in document type
    pub fn standard() -> std::result::Result<Self, RegistryError> {
        Self::new(vec![
            borrow_request()?,
            retirement_application()?,
            maintenance_ticket()?,
            inbound_order()?,
            scrap_order()?,
            procurement_application()?,
            procurement_order()?,
            quotation_request()?,
            inventory_count()?,
        ])
    }
}

fn approve(target: &str) -> Rule {
    Rule::new("pending", "approve", target)
        .role(Role::Approver)
        .optional_text("comment")
}

fn reject() -> Rule {
    Rule::new("pending", "reject", "rejected")
        .role(Role::Approver)
        .requires_text("reason")
}

fn submit() -> Rule {
    Rule::new("draft", "submit", "pending")
}

fn borrow_request() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::BorrowRequest)
        .states(["pending", "approved", "borrowed", "returned", "rejected", "cancelled"])
        .initial("pending")
        .terminal(["returned", "rejected", "cancelled"])
        .creation_text("applicant")
        .creation_text("assetName")
        .creation_field(FieldSpec::optional("expectedReturn", FieldKind::Date))
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "borrow", "borrowed").role(Role::Keeper).decrements())
        .rule(
            Rule::new("borrowed", "return", "returned")
                .role(Role::Keeper)
                .optional_text("condition")
                .increments(),
        )
        // the asset is out of the store, cancelling has to put it back
        .rule(Rule::new("borrowed", "cancel", "cancelled").role(Role::Keeper).increments())
        .cancellable_to("cancelled")
        .build()
}

fn retirement_application() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::RetirementApplication)
        .states(["draft", "pending", "approved", "processed", "rejected", "cancelled"])
        .initial("draft")
        .terminal(["processed", "rejected", "cancelled"])
        .creation_text("applicant")
        .creation_text("assetName")
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "process", "processed").role(Role::Keeper).decrements())
        .cancellable_to("cancelled")
        .build()
}

fn maintenance_ticket() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::MaintenanceTicket)
        .states(["pending", "approved", "inProgress", "completed", "rejected", "cancelled"])
        .initial("pending")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("reporter")
        .creation_text("assetName")
        .creation_text("fault")
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "beginMaintenance", "inProgress").role(Role::Keeper))
        .rule(
            Rule::new("inProgress", "complete", "completed")
                .role(Role::Keeper)
                .requires_text("result")
                .requires("cost", FieldKind::Integer),
        )
        .cancellable_to("cancelled")
        .build()
}

fn inbound_order() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::InboundOrder)
        .states(["draft", "pending", "approved", "completed", "rejected", "cancelled"])
        .initial("draft")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("warehouse")
        .requires_line_items()
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(
            Rule::new("approved", "complete", "completed")
                .role(Role::Keeper)
                .line_quantities(LineQuantities::Optional)
                .increments(),
        )
        .cancellable_to("cancelled")
        .build()
}

fn scrap_order() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::ScrapOrder)
        .states(["pending", "approved", "processed", "rejected", "cancelled"])
        .initial("pending")
        .terminal(["processed", "rejected", "cancelled"])
        .creation_text("applicant")
        .requires_line_items()
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "process", "processed").role(Role::Keeper).decrements())
        .cancellable_to("cancelled")
        .build()
}

fn procurement_application() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::ProcurementApplication)
        .states(["draft", "pending", "approved", "completed", "rejected", "cancelled"])
        .initial("draft")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("applicant")
        .creation_text("department")
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "complete", "completed").role(Role::Purchaser))
        .cancellable_to("cancelled")
        .build()
}

fn procurement_order() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::ProcurementOrder)
        .states([
            "draft", "pending", "approved", "delivered", "completed", "rejected", "cancelled",
        ])
        .initial("draft")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("supplier")
        .creation_field(FieldSpec::optional("applicationId", FieldKind::Reference))
        .requires_line_items()
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "deliver", "delivered").role(Role::Purchaser))
        .rule(
            Rule::new("delivered", "stockIn", "completed")
                .role(Role::Keeper)
                .line_quantities(LineQuantities::Optional)
                .increments(),
        )
        .cancellable_to("cancelled")
        .build()
}

fn quotation_request() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::QuotationRequest)
        .states(["draft", "pending", "approved", "completed", "rejected", "cancelled"])
        .initial("draft")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("title")
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(
            Rule::new("approved", "award", "completed")
                .role(Role::Purchaser)
                .requires_text("supplier"),
        )
        .cancellable_to("cancelled")
        .build()
}

fn inventory_count() -> std::result::Result<StateMachine, RegistryError> {
    StateMachine::builder(DocumentType::InventoryCount)
        .states(["draft", "pending", "approved", "inProgress", "completed", "rejected", "cancelled"])
        .initial("draft")
        .terminal(["completed", "rejected", "cancelled"])
        .creation_text("warehouse")
        .requires_line_items()
        .rule(submit())
        .rule(approve("approved"))
        .rule(reject())
        .rule(Rule::new("approved", "beginInventoryCount", "inProgress").role(Role::Keeper))
        .rule(
            Rule::new("inProgress", "complete", "completed")
                .role(Role::Keeper)
                .line_quantities(LineQuantities::Required),
        )
        .cancellable_to("cancelled")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tables_build() {
        let registry = Registry::standard().unwrap();
        for doc_type in DocumentType::ALL {
            let machine = registry.machine(doc_type).unwrap();
            assert!(machine.is_state(machine.initial()));
        }
    }

    #[test]
    fn cancel_is_added_to_every_non_terminal_state() {
        let registry = Registry::standard().unwrap();
        let machine = registry.machine(DocumentType::MaintenanceTicket).unwrap();

        for status in machine.states() {
            let cancel = machine.rule(status, CANCEL_ACTION);
            assert_eq!(cancel.is_some(), !machine.is_terminal(status), "{status}");
        }
    }

    #[test]
    fn explicit_cancel_is_not_replaced() {
        let registry = Registry::standard().unwrap();
        let rule = registry
            .rule(DocumentType::BorrowRequest, "borrowed", CANCEL_ACTION)
            .unwrap();

        assert_eq!(rule.target, "cancelled");
        assert_eq!(rule.required_role, Some(Role::Keeper));
        assert_eq!(rule.side_effect, Some(EffectKind::Increment));
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        let err = StateMachine::builder(DocumentType::ScrapOrder)
            .states(["pending", "approved"])
            .initial("pending")
            .rule(Rule::new("pending", "approve", "approved"))
            .rule(Rule::new("pending", "approve", "pending"))
            .build()
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateRule { .. }));
    }

    #[test]
    fn undeclared_status_is_rejected() {
        let err = StateMachine::builder(DocumentType::ScrapOrder)
            .states(["pending"])
            .initial("pending")
            .rule(Rule::new("pending", "approve", "approved"))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::UnknownStatus {
                doc_type: DocumentType::ScrapOrder,
                status: "approved".into()
            }
        );
    }

    #[test]
    fn terminal_state_cannot_have_rules() {
        let err = StateMachine::builder(DocumentType::ScrapOrder)
            .states(["pending", "processed"])
            .initial("pending")
            .terminal(["processed"])
            .rule(Rule::new("processed", "reopen", "pending"))
            .build()
            .unwrap_err();

        assert!(matches!(err, RegistryError::TerminalHasRule { .. }));
    }

    #[test]
    fn blank_required_text_fails() {
        let spec = FieldSpec::required("reason", FieldKind::Text);
        let mut fields = BTreeMap::new();
        assert!(spec.check(&fields).is_err());

        fields.insert("reason".to_string(), FieldValue::from("   "));
        assert!(spec.check(&fields).is_err());

        fields.insert("reason".to_string(), FieldValue::Integer(1));
        assert!(spec.check(&fields).is_err());

        fields.insert("reason".to_string(), FieldValue::from("broken screen"));
        assert!(spec.check(&fields).is_ok());
    }
}
