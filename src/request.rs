//! The parsed query the transport layer hands to the engine.

use std::collections::HashMap;

use async_graphql::parser::parse_query;
use async_graphql::parser::types::{
    DocumentOperations, Field, OperationDefinition, OperationType, Selection as AstSelection,
    SelectionSet,
};
use async_graphql::Name;
use async_graphql_value::{ConstValue, Value};
use indexmap::IndexMap;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// Field arguments, already coerced to strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(IndexMap<String, String>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Arguments,
    pub selection_set: Vec<Selection>,
}

impl Selection {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: Arguments::default(),
            selection_set: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name, value);
        self
    }

    pub fn select(mut self, children: impl IntoIterator<Item = Selection>) -> Self {
        self.selection_set.extend(children);
        self
    }

    /// Key under which the value appears in the result tree.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub operation: OperationKind,
    pub selections: Vec<Selection>,
}

impl Request {
    pub fn new(operation: OperationKind, selections: impl IntoIterator<Item = Selection>) -> Self {
        Self {
            operation,
            selections: selections.into_iter().collect(),
        }
    }

    pub fn query(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Query, selections)
    }

    pub fn mutation(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Mutation, selections)
    }

    pub fn subscription(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Subscription, selections)
    }

    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        Self::parse_with(source, None, None)
    }

    /// Parses query text, picking `operation_name` when the document holds
    /// several operations and substituting `variables` (a JSON object).
    pub fn parse_with(
        source: &str,
        operation_name: Option<&str>,
        variables: Option<serde_json::Value>,
    ) -> Result<Self, SchemaError> {
        let document = parse_query(source).map_err(|e| SchemaError::ParseError {
            message: e.to_string(),
        })?;

        if !document.fragments.is_empty() {
            return Err(unsupported("fragments"));
        }

        let operation = select_operation(document.operations, operation_name)?;
        if !operation.directives.is_empty() {
            return Err(unsupported("directives"));
        }

        let variables = bind_variables(&operation, variables)?;
        let kind = match operation.ty {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        };

        Ok(Self {
            operation: kind,
            selections: convert_selection_set(operation.selection_set.node, &variables)?,
        })
    }
}

fn unsupported(what: &str) -> SchemaError {
    SchemaError::Unsupported {
        message: format!("{} are not supported", what),
    }
}

fn select_operation(
    operations: DocumentOperations,
    operation_name: Option<&str>,
) -> Result<OperationDefinition, SchemaError> {
    match operations {
        DocumentOperations::Single(operation) => Ok(operation.node),
        DocumentOperations::Multiple(operations) => {
            let found = match operation_name {
                Some(wanted) => operations
                    .into_iter()
                    .find(|(name, _)| name.as_str() == wanted),
                None if operations.len() == 1 => operations.into_iter().next(),
                None => {
                    return Err(SchemaError::ParseError {
                        message: "an operation name is required when the document has several operations"
                            .to_string(),
                    })
                }
            };

            found
                .map(|(_, operation)| operation.node)
                .ok_or_else(|| SchemaError::ParseError {
                    message: format!(
                        "unknown operation '{}'",
                        operation_name.unwrap_or_default()
                    ),
                })
        }
    }
}

fn bind_variables(
    operation: &OperationDefinition,
    provided: Option<serde_json::Value>,
) -> Result<HashMap<String, ConstValue>, SchemaError> {
    let provided = match provided {
        Some(json) => ConstValue::from_json(json).map_err(|e| SchemaError::ParseError {
            message: format!("invalid variables: {}", e),
        })?,
        None => ConstValue::Null,
    };
    let provided = match provided {
        ConstValue::Object(map) => map,
        ConstValue::Null => IndexMap::new(),
        _ => {
            return Err(SchemaError::ParseError {
                message: "variables must be an object".to_string(),
            })
        }
    };

    let mut bound = HashMap::new();
    for definition in &operation.variable_definitions {
        let name = definition.node.name.node.as_str();
        let value = provided
            .get(name)
            .cloned()
            .or_else(|| definition.node.default_value.as_ref().map(|d| d.node.clone()));
        if let Some(value) = value {
            bound.insert(name.to_string(), value);
        }
    }
    Ok(bound)
}

fn convert_selection_set(
    set: SelectionSet,
    variables: &HashMap<String, ConstValue>,
) -> Result<Vec<Selection>, SchemaError> {
    set.items
        .into_iter()
        .map(|item| match item.node {
            AstSelection::Field(field) => convert_field(field.node, variables),
            AstSelection::FragmentSpread(_) | AstSelection::InlineFragment(_) => {
                Err(unsupported("fragments"))
            }
        })
        .collect()
}

fn convert_field(
    field: Field,
    variables: &HashMap<String, ConstValue>,
) -> Result<Selection, SchemaError> {
    if !field.directives.is_empty() {
        return Err(unsupported("directives"));
    }

    let mut arguments = Arguments::default();
    for (name, value) in field.arguments {
        let value = resolve_value(value.node, variables)?;
        if value != ConstValue::Null {
            arguments.insert(name.node.as_str(), argument_text(value));
        }
    }

    Ok(Selection {
        name: field.name.node.to_string(),
        alias: field.alias.map(|a| a.node.to_string()),
        arguments,
        selection_set: convert_selection_set(field.selection_set.node, variables)?,
    })
}

fn resolve_value(
    value: Value,
    variables: &HashMap<String, ConstValue>,
) -> Result<ConstValue, SchemaError> {
    value.into_const_with(|name: Name| {
        variables
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| SchemaError::ParseError {
                message: format!("variable ${} is not defined", name),
            })
    })
}

fn argument_text(value: ConstValue) -> String {
    match value {
        ConstValue::String(s) => s,
        ConstValue::Enum(e) => e.to_string(),
        other => other.to_string(),
    }
}
