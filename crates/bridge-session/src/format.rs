//! One-line renderings of backend variable trees.

use bridge_rpc::api::{Variable, VariableKind};

/// Renders a variable with the default formatter.
pub fn summarize(variable: &Variable) -> String {
    VariableFormatter::default().summarize(variable)
}

/// `name = summary`, as used by stack and variable listings.
pub fn variable_line(variable: &Variable) -> String {
    format!("{} = {}", variable.name, summarize(variable))
}

#[derive(Clone, Debug)]
pub struct VariableFormatter {
    max_depth: usize,
}

impl Default for VariableFormatter {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

impl VariableFormatter {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn summarize(&self, variable: &Variable) -> String {
        self.format_at(variable, 0)
    }

    fn format_at(&self, variable: &Variable, depth: usize) -> String {
        if !variable.unreadable.is_empty() {
            return format!("(unreadable {})", variable.unreadable);
        }
        if depth > self.max_depth {
            return format!("{} (truncated)", variable.type_name);
        }

        let type_name = variable.type_name.as_str();
        match variable.kind() {
            VariableKind::String => format!("{:?}", variable.value),
            VariableKind::Slice | VariableKind::Array => {
                if variable.len == 0 {
                    "[]".to_owned()
                } else {
                    format!("{type_name} (len={})", variable.len)
                }
            }
            VariableKind::Pointer => match variable.children().first() {
                Some(target) => self.format_at(target, depth + 1),
                None if type_name.is_empty() => "nil".to_owned(),
                None => format!("({type_name}) nil"),
            },
            VariableKind::Struct => format!("{type_name} {{ ... }}"),
            VariableKind::Map if type_name.starts_with("map[") => {
                format!("{type_name} (len={})", variable.len)
            }
            VariableKind::Map => format!("map[{type_name}] (len={})", variable.len),
            VariableKind::Interface => match variable.children().first() {
                Some(inner) => self.format_at(inner, depth + 1),
                None => format!("({type_name}) nil"),
            },
            _ => variable.value.clone(),
        }
    }
}
