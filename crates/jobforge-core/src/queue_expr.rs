//! Parses the queue-selection expression a scheduler pool is configured with.
//!
//! Grammar: `"*"` (all queues), `"a,b,c"` (include list), `"+a,b"` (ordered
//! include list: `a` drains before `b`), `"-a,b"` (exclude list), and the
//! `"*,!x"` shorthand equivalent to `"-x"`. The literal `*` is the only
//! permitted wildcard; `queue*`-style patterns are rejected. A `:N` suffix on
//! any queue name is a pool slot-count annotation, parsed by the caller
//! (scheduler pool configuration), not by this expression itself.

use crate::error::QueueError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueExpr {
    All,
    Include { queues: Vec<String>, ordered: bool },
    Exclude { queues: Vec<String> },
}

impl std::str::FromStr for QueueExpr {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QueueError::InvalidQueueExpression(
                "queue expression must not be empty".to_string(),
            ));
        }

        if s == "*" {
            return Ok(QueueExpr::All);
        }

        if let Some(rest) = s.strip_prefix("*,!") {
            return Ok(QueueExpr::Exclude {
                queues: parse_list(rest)?,
            });
        }

        if let Some(rest) = s.strip_prefix('-') {
            return Ok(QueueExpr::Exclude {
                queues: parse_list(rest)?,
            });
        }

        if let Some(rest) = s.strip_prefix('+') {
            return Ok(QueueExpr::Include {
                queues: parse_list(rest)?,
                ordered: true,
            });
        }

        Ok(QueueExpr::Include {
            queues: parse_list(s)?,
            ordered: false,
        })
    }
}

impl std::fmt::Display for QueueExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueExpr::All => write!(f, "*"),
            QueueExpr::Include { queues, ordered } => {
                if *ordered {
                    write!(f, "+{}", queues.join(","))
                } else {
                    write!(f, "{}", queues.join(","))
                }
            }
            QueueExpr::Exclude { queues } => write!(f, "-{}", queues.join(",")),
        }
    }
}

impl QueueExpr {
    /// Whether a job in `queue_name` is eligible for this scheduler pool.
    pub fn matches(&self, queue_name: &str) -> bool {
        match self {
            QueueExpr::All => true,
            QueueExpr::Include { queues, .. } => queues.iter().any(|q| q == queue_name),
            QueueExpr::Exclude { queues } => !queues.iter().any(|q| q == queue_name),
        }
    }

    /// Returns `(position, true)` for ordered include expressions, used to
    /// rank candidates so earlier queues drain strictly before later ones.
    pub fn order_rank(&self, queue_name: &str) -> Option<usize> {
        match self {
            QueueExpr::Include { queues, ordered: true } => {
                queues.iter().position(|q| q == queue_name)
            }
            _ => None,
        }
    }
}

fn parse_list(s: &str) -> Result<Vec<String>, QueueError> {
    let names: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        return Err(QueueError::InvalidQueueExpression(format!(
            "no queue names found in {s:?}"
        )));
    }

    for name in &names {
        if name.contains('*') {
            return Err(QueueError::InvalidQueueExpression(format!(
                "wildcard patterns like {name:?} are not permitted; only a bare \"*\" is"
            )));
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all() {
        assert_eq!("*".parse::<QueueExpr>().unwrap(), QueueExpr::All);
    }

    #[test]
    fn parses_include_list() {
        assert_eq!(
            "a,b,c".parse::<QueueExpr>().unwrap(),
            QueueExpr::Include {
                queues: vec!["a".into(), "b".into(), "c".into()],
                ordered: false
            }
        );
    }

    #[test]
    fn parses_ordered_include_list() {
        let expr = "+a,b".parse::<QueueExpr>().unwrap();
        assert_eq!(
            expr,
            QueueExpr::Include {
                queues: vec!["a".into(), "b".into()],
                ordered: true
            }
        );
        assert_eq!(expr.order_rank("a"), Some(0));
        assert_eq!(expr.order_rank("b"), Some(1));
    }

    #[test]
    fn parses_exclude_list() {
        assert_eq!(
            "-a,b".parse::<QueueExpr>().unwrap(),
            QueueExpr::Exclude {
                queues: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn star_bang_is_exclude_shorthand() {
        assert_eq!(
            "*,!x".parse::<QueueExpr>().unwrap(),
            "-x".parse::<QueueExpr>().unwrap()
        );
    }

    #[test]
    fn rejects_wildcard_patterns() {
        assert!("queue*".parse::<QueueExpr>().is_err());
    }

    #[test]
    fn matches_respects_exclude() {
        let expr = QueueExpr::Exclude {
            queues: vec!["low".into()],
        };
        assert!(expr.matches("default"));
        assert!(!expr.matches("low"));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["*", "a,b,c", "+a,b", "-a,b"] {
            let expr: QueueExpr = raw.parse().unwrap();
            assert_eq!(expr.to_string(), raw);
        }
    }
}
