//! Encoded-query builder and `sysparm_*` request parameters.
//!
//! The instance filters with an encoded query string: `field=value` terms joined
//! by `^` (AND) or `^OR` (OR with the previous term), optionally followed by
//! `^ORDERBYDESC<field>`. A literal `^` inside a value is written as `^^`.

use std::fmt;

pub const SYSPARM_QUERY: &str = "sysparm_query";
pub const SYSPARM_LIMIT: &str = "sysparm_limit";
pub const SYSPARM_OFFSET: &str = "sysparm_offset";
pub const SYSPARM_FIELDS: &str = "sysparm_fields";
pub const SYSPARM_DISPLAY_VALUE: &str = "sysparm_display_value";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Join {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Term {
    Condition {
        join: Join,
        field: String,
        operator: &'static str,
        value: String,
    },
    OrderByDesc(String),
    OrderBy(String),
}

/// Encoded query with explicit AND/OR combinators.
///
/// ```
/// use itsm_bridge::servicenow::Filter;
///
/// let query = Filter::new()
///     .eq("active", "true")
///     .like("number", "INC001")
///     .or_like("short_description", "INC001")
///     .order_by_desc("sys_updated_on");
///
/// assert_eq!(
///     query.to_string(),
///     "active=true^numberLIKEINC001^ORshort_descriptionLIKEINC001^ORDERBYDESCsys_updated_on"
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, join: Join, field: &str, operator: &'static str, value: &str) -> Self {
        self.terms.push(Term::Condition {
            join,
            field: field.to_string(),
            operator,
            value: value.to_string(),
        });
        self
    }

    /// AND `field=value`
    pub fn eq(self, field: &str, value: &str) -> Self {
        self.push(Join::And, field, "=", value)
    }

    /// AND `field=value`, skipped when `value` is empty.
    ///
    /// An empty value means "no filter on this field", never "field is empty".
    pub fn eq_if_present(self, field: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.eq(field, value)
        }
    }

    /// AND `fieldLIKEvalue` (substring match)
    pub fn like(self, field: &str, value: &str) -> Self {
        self.push(Join::And, field, "LIKE", value)
    }

    /// OR `field=value` with the previous term
    pub fn or_eq(self, field: &str, value: &str) -> Self {
        self.push(Join::Or, field, "=", value)
    }

    /// OR `fieldLIKEvalue` with the previous term
    pub fn or_like(self, field: &str, value: &str) -> Self {
        self.push(Join::Or, field, "LIKE", value)
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.terms.push(Term::OrderByDesc(field.to_string()));
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.terms.push(Term::OrderBy(field.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str("^")?;
            }
            match term {
                Term::Condition {
                    join,
                    field,
                    operator,
                    value,
                } => {
                    if i > 0 && *join == Join::Or {
                        f.write_str("OR")?;
                    }
                    write!(f, "{}{}{}", field, operator, escape(value))?;
                }
                Term::OrderByDesc(field) => write!(f, "ORDERBYDESC{}", field)?,
                Term::OrderBy(field) => write!(f, "ORDERBY{}", field)?,
            }
        }
        Ok(())
    }
}

fn escape(value: &str) -> String {
    value.replace('^', "^^")
}

/// Query string parameters for a single call, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// `sysparm_query`, omitted for an empty filter.
    pub fn query(self, filter: &Filter) -> Self {
        if filter.is_empty() {
            self
        } else {
            self.param(SYSPARM_QUERY, filter)
        }
    }

    pub fn limit(self, limit: u32) -> Self {
        self.param(SYSPARM_LIMIT, limit)
    }

    pub fn offset(self, offset: u32) -> Self {
        self.param(SYSPARM_OFFSET, offset)
    }

    /// `sysparm_fields` projection
    pub fn fields(self, fields: &[&str]) -> Self {
        self.param(SYSPARM_FIELDS, fields.join(","))
    }

    /// Ask for human-readable values of reference and choice fields.
    pub fn display_value(self) -> Self {
        self.param(SYSPARM_DISPLAY_VALUE, "true")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
