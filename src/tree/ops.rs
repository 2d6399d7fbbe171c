// Search operators (spec §4.3 "search(op, val, include)").

use crate::types::TypedValue;
use regex::Regex;

#[derive(Debug, Clone)]
pub enum Operator {
    Eq(TypedValue),
    Ne(TypedValue),
    Lt(TypedValue),
    Lte(TypedValue),
    Gt(TypedValue),
    Gte(TypedValue),
    In(Vec<TypedValue>),
    NotIn(Vec<TypedValue>),
    Between(TypedValue, TypedValue),
    NotBetween(TypedValue, TypedValue),
    /// Glob pattern: `*` matches any run, `?` matches one character.
    Like(String),
    NotLike(String),
    Matches(Regex),
    NotMatches(Regex),
    Exists,
    NotExists,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq(_) => "==",
            Operator::Ne(_) => "!=",
            Operator::Lt(_) => "<",
            Operator::Lte(_) => "<=",
            Operator::Gt(_) => ">",
            Operator::Gte(_) => ">=",
            Operator::In(_) => "in",
            Operator::NotIn(_) => "!in",
            Operator::Between(..) => "between",
            Operator::NotBetween(..) => "!between",
            Operator::Like(_) => "like",
            Operator::NotLike(_) => "!like",
            Operator::Matches(_) => "matches",
            Operator::NotMatches(_) => "!matches",
            Operator::Exists => "exists",
            Operator::NotExists => "!exists",
        }
    }

    /// Operators that are satisfied by a contiguous leaf-chain range
    /// starting from a single seek point, vs. operators that require a
    /// full-chain scan (negations and set membership).
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Eq(_)
                | Operator::Lt(_)
                | Operator::Lte(_)
                | Operator::Gt(_)
                | Operator::Gte(_)
                | Operator::Between(..)
        )
    }
}

/// Glob match with `*` (any run, including empty) and `?` (exactly one
/// character). Used by `like`/`!like` and by the fulltext/geo
/// specializations' prefix and wildcard queries.
pub fn glob_match(pattern: &str, text: &str, case_sensitive: bool) -> bool {
    let (pattern, text) = if case_sensitive {
        (pattern.to_string(), text.to_string())
    } else {
        (pattern.to_lowercase(), text.to_lowercase())
    };
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_chars(&p, &t)
}

fn glob_match_chars(p: &[char], t: &[char]) -> bool {
    // classic DP for glob with * and ?
    let (plen, tlen) = (p.len(), t.len());
    let mut dp = vec![vec![false; tlen + 1]; plen + 1];
    dp[0][0] = true;
    for i in 1..=plen {
        if p[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=plen {
        for j in 1..=tlen {
            dp[i][j] = match p[i - 1] {
                '*' => dp[i - 1][j] || dp[i][j - 1],
                '?' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == t[j - 1],
            };
        }
    }
    dp[plen][tlen]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_star_and_question_mark() {
        assert!(glob_match("wild*card", "wildxxxcard", true));
        assert!(glob_match("wo?d", "word", true));
        assert!(!glob_match("wo?d", "woxyd", true));
        assert!(glob_match("*", "anything", true));
    }

    #[test]
    fn glob_honors_case_sensitivity() {
        assert!(!glob_match("HELLO", "hello", true));
        assert!(glob_match("HELLO", "hello", false));
    }
}
