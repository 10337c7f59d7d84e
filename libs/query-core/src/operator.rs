use std::fmt;
use std::str::FromStr;

/// The closed set of condition operators understood by the grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Like,
    StartWith,
    EndWith,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    IsNull,
    NotNull,
}

/// How the raw value string of a condition is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandShape {
    /// One value coerced against the field type.
    Single,
    /// Comma-separated values, each coerced independently.
    List,
    /// A boolean switch; the condition is emitted only when true.
    Flag,
}

impl Operator {
    pub const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::NotEq,
        Operator::Like,
        Operator::StartWith,
        Operator::EndWith,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::In,
        Operator::NotIn,
        Operator::IsNull,
        Operator::NotNull,
    ];

    /// Canonical token as it appears in a condition key.
    pub fn token(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::NotEq => "notEq",
            Operator::Like => "like",
            Operator::StartWith => "startwith",
            Operator::EndWith => "endwith",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::IsNull => "isNull",
            Operator::NotNull => "notNull",
        }
    }

    pub fn operand_shape(self) -> OperandShape {
        match self {
            Operator::In | Operator::NotIn => OperandShape::List,
            Operator::IsNull | Operator::NotNull => OperandShape::Flag,
            _ => OperandShape::Single,
        }
    }

    /// Pattern operators only make sense on textual columns.
    pub fn is_pattern(self) -> bool {
        matches!(self, Operator::Like | Operator::StartWith | Operator::EndWith)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Tokens are matched case-insensitively (`notEq`, `noteq` and `NOTEQ` are equal).
impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.token().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_token_parses_back() {
        for op in Operator::ALL {
            assert_eq!(op.token().parse::<Operator>(), Ok(op));
        }
    }

    #[test]
    fn tokens_are_case_insensitive() {
        assert_eq!("ISNULL".parse::<Operator>(), Ok(Operator::IsNull));
        assert_eq!("StartWith".parse::<Operator>(), Ok(Operator::StartWith));
        assert!("between".parse::<Operator>().is_err());
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(Operator::In.operand_shape(), OperandShape::List);
        assert_eq!(Operator::NotNull.operand_shape(), OperandShape::Flag);
        assert_eq!(Operator::Le.operand_shape(), OperandShape::Single);
    }
}
