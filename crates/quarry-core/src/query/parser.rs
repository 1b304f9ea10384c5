//! Method-name query parser: turns strings like
//! `findByAgeGreaterThanAndActiveGroupByCountryThenByCityOrderByAgeDesc`
//! into a [`ParsedMethod`] template, later bound to concrete call arguments
//! via [`ParsedMethod::bind`].

use serde_json::Value;

use super::{Aggregate, Cond, Op, QueryError, SortDirection, Stmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Find,
    List,
    Page,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Distinct,
}

/// A condition shape with operator arity but no bound values yet.
#[derive(Debug, Clone, PartialEq)]
enum OpTemplate {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    In,
    Like,
    IsNull,
    IsNotNull,
    True,
    False,
}

impl OpTemplate {
    fn arity(&self) -> usize {
        match self {
            OpTemplate::Between => 2,
            OpTemplate::IsNull
            | OpTemplate::IsNotNull
            | OpTemplate::True
            | OpTemplate::False => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CondTemplate {
    Attr(String, OpTemplate),
    And(Vec<CondTemplate>),
    Or(Vec<CondTemplate>),
}

/// The result of parsing a method name: a statement template that still
/// needs its positional parameters filled in by [`bind`](Self::bind).
#[derive(Debug, Clone)]
pub struct ParsedMethod {
    pub kind: MethodKind,
    pub target: Option<String>,
    filter: Option<CondTemplate>,
    pub group: Vec<String>,
    pub order: Vec<(String, SortDirection)>,
}

impl ParsedMethod {
    /// Substitute `params` into the condition template in positional order,
    /// producing a concrete [`Stmt`] against `table`.
    pub fn bind(&self, table: &str, params: &[Value]) -> Result<Stmt, QueryError> {
        let mut cursor = 0usize;
        let filter = self
            .filter
            .as_ref()
            .map(|tmpl| bind_cond(tmpl, params, &mut cursor))
            .transpose()?;

        let aggregate = match self.kind {
            MethodKind::Count => Some((Aggregate::Count, self.target.clone().unwrap_or_default())),
            MethodKind::Sum => Some((Aggregate::Sum, self.target.clone().unwrap_or_default())),
            MethodKind::Avg => Some((Aggregate::Avg, self.target.clone().unwrap_or_default())),
            MethodKind::Min => Some((Aggregate::Min, self.target.clone().unwrap_or_default())),
            MethodKind::Max => Some((Aggregate::Max, self.target.clone().unwrap_or_default())),
            MethodKind::Distinct => Some((Aggregate::Distinct, self.target.clone().unwrap_or_default())),
            _ => None,
        };

        Ok(Stmt {
            from: table.to_string(),
            select: None,
            filter,
            order: self.order.clone(),
            group: self.group.clone(),
            limit: None,
            offset: None,
            aggregate,
        })
    }
}

fn bind_cond(tmpl: &CondTemplate, params: &[Value], cursor: &mut usize) -> Result<Cond, QueryError> {
    Ok(match tmpl {
        CondTemplate::And(parts) => Cond::And(
            parts
                .iter()
                .map(|p| bind_cond(p, params, cursor))
                .collect::<Result<_, _>>()?,
        ),
        CondTemplate::Or(parts) => Cond::Or(
            parts
                .iter()
                .map(|p| bind_cond(p, params, cursor))
                .collect::<Result<_, _>>()?,
        ),
        CondTemplate::Attr(field, op) => {
            let take = |cursor: &mut usize| -> Result<Value, QueryError> {
                let v = params
                    .get(*cursor)
                    .cloned()
                    .ok_or_else(|| QueryError::UnknownOperator(format!("missing parameter {cursor}")))?;
                *cursor += 1;
                Ok(v)
            };
            let op = match op {
                OpTemplate::Equals => Op::Equals(take(cursor)?),
                OpTemplate::NotEquals => Op::NotEquals(take(cursor)?),
                OpTemplate::GreaterThan => Op::GreaterThan(take(cursor)?),
                OpTemplate::GreaterThanOrEqual => Op::GreaterThanOrEqual(take(cursor)?),
                OpTemplate::LessThan => Op::LessThan(take(cursor)?),
                OpTemplate::LessThanOrEqual => Op::LessThanOrEqual(take(cursor)?),
                OpTemplate::Between => {
                    let lo = take(cursor)?;
                    let hi = take(cursor)?;
                    Op::Between(lo, hi)
                }
                OpTemplate::In => match take(cursor)? {
                    Value::Array(values) => Op::In(values),
                    other => Op::In(vec![other]),
                },
                OpTemplate::Like => Op::Like(take(cursor)?.as_str().unwrap_or_default().to_string()),
                OpTemplate::IsNull => Op::IsNull,
                OpTemplate::IsNotNull => Op::IsNotNull,
                OpTemplate::True => Op::True,
                OpTemplate::False => Op::False,
            };
            Cond::Attr(field.clone(), op)
        }
    })
}

/// Split a camelCase or PascalCase identifier into its constituent words,
/// e.g. `"findByAgeGreaterThanAndActive"` ->
/// `["find","By","Age","Greater","Than","And","Active"]`.
fn split_camel(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in name.chars() {
        if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Try to match a fixed token sequence at `tokens[pos..]`, case-sensitively.
fn match_seq(tokens: &[String], pos: usize, seq: &[&str]) -> bool {
    if pos + seq.len() > tokens.len() {
        return false;
    }
    tokens[pos..pos + seq.len()]
        .iter()
        .zip(seq)
        .all(|(tok, expect)| tok == expect)
}

const OP_KEYWORDS: &[(&[&str], OpTemplate)] = &[
    (&["Greater", "Than", "Or", "Equal"], OpTemplate::GreaterThanOrEqual),
    (&["Less", "Than", "Or", "Equal"], OpTemplate::LessThanOrEqual),
    (&["Greater", "Than"], OpTemplate::GreaterThan),
    (&["Less", "Than"], OpTemplate::LessThan),
    (&["Not", "Equals"], OpTemplate::NotEquals),
    (&["Is", "Not", "Null"], OpTemplate::IsNotNull),
    (&["Is", "Null"], OpTemplate::IsNull),
    (&["Equals"], OpTemplate::Equals),
    (&["Between"], OpTemplate::Between),
    (&["In"], OpTemplate::In),
    (&["Like"], OpTemplate::Like),
    (&["True"], OpTemplate::True),
    (&["False"], OpTemplate::False),
];

/// Find the longest keyword match (operator, combinator, or clause
/// introducer) starting at `pos`. Returns the matched token count.
fn match_keyword_at(tokens: &[String], pos: usize) -> Option<(&'static str, usize)> {
    let clause_keywords: &[(&[&str], &str)] = &[
        (&["Group", "By"], "GroupBy"),
        (&["Then", "By"], "ThenBy"),
        (&["Order", "By"], "OrderBy"),
        (&["And"], "And"),
        (&["Or"], "Or"),
        (&["Desc"], "Desc"),
        (&["Asc"], "Asc"),
    ];
    for (seq, name) in clause_keywords {
        if match_seq(tokens, pos, seq) {
            return Some((name, seq.len()));
        }
    }
    None
}

fn match_op_at(tokens: &[String], pos: usize) -> Option<(OpTemplate, usize)> {
    for (seq, op) in OP_KEYWORDS {
        if match_seq(tokens, pos, seq) {
            return Some((op.clone(), seq.len()));
        }
    }
    None
}

/// Parse one attribute-then-operator leaf starting at `pos`, stopping at the
/// first recognised operator keyword, an `And`/`Or` combinator, or `stop`
/// (the boundary of the condition region, i.e. where a `GroupBy`/`OrderBy`
/// clause or the end of the method name begins). Attribute name tokens are
/// joined with the first character lower-cased (so `Age` -> `age`,
/// `FirstName` -> `firstName` when multi-word attributes appear). A bare
/// attribute with no operator suffix (reaching a combinator or `stop` while
/// still collecting attribute tokens) defaults to `Equals`, e.g. the
/// `Active` in `findByAgeGreaterThanAndActive` binds to `active = <param>`.
fn parse_leaf(tokens: &[String], mut pos: usize, stop: usize) -> Result<(CondTemplate, usize), QueryError> {
    let mut attr_tokens = Vec::new();
    loop {
        if pos >= stop {
            return finish_as_equals(attr_tokens, pos);
        }
        if let Some((op, consumed)) = match_op_at(tokens, pos) {
            if pos + consumed <= stop {
                let field = join_attr(&attr_tokens);
                return Ok((CondTemplate::Attr(field, op), pos + consumed));
            }
        }
        if matches!(match_keyword_at(tokens, pos), Some(("And", _)) | Some(("Or", _))) {
            return finish_as_equals(attr_tokens, pos);
        }
        attr_tokens.push(tokens[pos].clone());
        pos += 1;
    }
}

fn finish_as_equals(attr_tokens: Vec<String>, pos: usize) -> Result<(CondTemplate, usize), QueryError> {
    if attr_tokens.is_empty() {
        return Err(QueryError::UnknownOperator("condition missing an operator".to_string()));
    }
    let field = join_attr(&attr_tokens);
    Ok((CondTemplate::Attr(field, OpTemplate::Equals), pos))
}

fn join_attr(tokens: &[String]) -> String {
    let mut out = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        if i == 0 {
            let mut chars = tok.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_lowercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push_str(tok);
        }
    }
    out
}

/// Parse a chain of leaves joined by `And`/`Or` until a `GroupBy`/`OrderBy`
/// clause or end of input. `And` binds tighter than `Or`, matching the
/// reference implementation's left-to-right, no-parenthesisation grammar.
fn parse_condition_chain(tokens: &[String], start: usize, stop: usize) -> Result<CondTemplate, QueryError> {
    let mut or_groups: Vec<Vec<CondTemplate>> = vec![Vec::new()];
    let mut pos = start;
    loop {
        let (leaf, next) = parse_leaf(tokens, pos, stop)?;
        or_groups.last_mut().unwrap().push(leaf);
        pos = next;
        if pos >= stop {
            break;
        }
        match match_keyword_at(&tokens[..stop], pos) {
            Some(("And", consumed)) => pos += consumed,
            Some(("Or", consumed)) => {
                pos += consumed;
                or_groups.push(Vec::new());
            }
            _ => break,
        }
    }
    let ands: Vec<CondTemplate> = or_groups
        .into_iter()
        .map(|group| {
            if group.len() == 1 {
                group.into_iter().next().unwrap()
            } else {
                CondTemplate::And(group)
            }
        })
        .collect();
    Ok(if ands.len() == 1 {
        ands.into_iter().next().unwrap()
    } else {
        CondTemplate::Or(ands)
    })
}

const PREFIXES: &[(&str, MethodKind)] = &[
    ("find", MethodKind::Find),
    ("list", MethodKind::List),
    ("page", MethodKind::Page),
    ("count", MethodKind::Count),
    ("sum", MethodKind::Sum),
    ("avg", MethodKind::Avg),
    ("min", MethodKind::Min),
    ("max", MethodKind::Max),
    ("distinct", MethodKind::Distinct),
];

/// Parse a full repository method name into a [`ParsedMethod`] template.
pub fn parse_method_name(name: &str) -> Result<ParsedMethod, QueryError> {
    let tokens = split_camel(name);
    let (kind, prefix_len) = PREFIXES
        .iter()
        .find(|(prefix, _)| tokens.first().map(|t| t.as_str()) == Some(*prefix))
        .filter(|_| tokens.get(1).map(|t| t.as_str()) == Some("By"))
        .map(|(_, kind)| (*kind, 2usize))
        .ok_or_else(|| QueryError::UnsupportedMethod(name.to_string()))?;

    // Target attribute for aggregate prefixes: `sumByAmount` / `countByAll`.
    let mut pos = prefix_len;
    let mut target = None;
    if matches!(
        kind,
        MethodKind::Sum
            | MethodKind::Avg
            | MethodKind::Min
            | MethodKind::Max
            | MethodKind::Count
            | MethodKind::Distinct
    ) {
        let mut target_tokens = Vec::new();
        while pos < tokens.len() && match_keyword_at(&tokens, pos).is_none() && match_op_at(&tokens, pos).is_none() {
            // Stop as soon as a following `Where`-free condition would start;
            // aggregate target is just the very next attribute word.
            target_tokens.push(tokens[pos].clone());
            pos += 1;
            break;
        }
        if !target_tokens.is_empty() {
            target = Some(join_attr(&target_tokens));
        }
    }

    // Find the span boundaries for condition / groupBy / orderBy clauses.
    let group_start = find_keyword(&tokens, pos, "GroupBy");
    let order_start = find_keyword(&tokens, pos, "OrderBy");

    if let (Some(g), Some(o)) = (group_start, order_start) {
        if g > o {
            return Err(QueryError::GroupByAfterOrderBy);
        }
    }

    let filter_end = group_start.or(order_start).unwrap_or(tokens.len());
    let filter = if pos < filter_end {
        Some(parse_condition_chain(&tokens, pos, filter_end)?)
    } else {
        None
    };

    let mut group = Vec::new();
    if let Some(g) = group_start {
        let group_end = order_start.unwrap_or(tokens.len());
        group = parse_group_or_order_fields(&tokens, g + 2, group_end, "ThenBy");
    }

    let mut order = Vec::new();
    if let Some(o) = order_start {
        order = parse_order_fields(&tokens, o + 2, tokens.len());
    }

    Ok(ParsedMethod {
        kind,
        target,
        filter,
        group,
        order,
    })
}

fn find_keyword(tokens: &[String], from: usize, keyword: &str) -> Option<usize> {
    let mut pos = from;
    while pos < tokens.len() {
        if let Some((name, _)) = match_keyword_at(tokens, pos) {
            if name == keyword {
                return Some(pos);
            }
        }
        pos += 1;
    }
    None
}

fn parse_group_or_order_fields(tokens: &[String], start: usize, end: usize, sep: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut pos = start;
    let mut current = Vec::new();
    while pos < end {
        if let Some((name, consumed)) = match_keyword_at(tokens, pos) {
            if name == sep {
                fields.push(join_attr(&current));
                current.clear();
                pos += consumed;
                continue;
            }
        }
        current.push(tokens[pos].clone());
        pos += 1;
    }
    if !current.is_empty() {
        fields.push(join_attr(&current));
    }
    fields
}

fn parse_order_fields(tokens: &[String], start: usize, end: usize) -> Vec<(String, SortDirection)> {
    let mut fields = Vec::new();
    let mut pos = start;
    let mut current = Vec::new();
    let mut flush = |current: &mut Vec<String>, dir: SortDirection, fields: &mut Vec<(String, SortDirection)>| {
        if !current.is_empty() {
            fields.push((join_attr(current), dir));
            current.clear();
        }
    };
    while pos < end {
        if let Some((name, consumed)) = match_keyword_at(tokens, pos) {
            match name {
                "ThenBy" => {
                    flush(&mut current, SortDirection::Asc, &mut fields);
                    pos += consumed;
                    continue;
                }
                "Desc" => {
                    flush(&mut current, SortDirection::Desc, &mut fields);
                    pos += consumed;
                    continue;
                }
                "Asc" => {
                    flush(&mut current, SortDirection::Asc, &mut fields);
                    pos += consumed;
                    continue;
                }
                _ => {}
            }
        }
        current.push(tokens[pos].clone());
        pos += 1;
    }
    flush(&mut current, SortDirection::Asc, &mut fields);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_simple_find_by() {
        let parsed = parse_method_name("findByAge").unwrap();
        assert_eq!(parsed.kind, MethodKind::Find);
        let stmt = parsed.bind("users", &[json!(30)]).unwrap();
        assert_eq!(
            stmt.filter,
            Some(Cond::Attr("age".to_string(), Op::Equals(json!(30))))
        );
    }

    #[test]
    fn parses_and_with_operator_and_order_desc() {
        let parsed = parse_method_name("findByAgeGreaterThanAndActiveOrderByAgeDesc").unwrap();
        let stmt = parsed.bind("users", &[json!(18), json!(true)]).unwrap();
        assert_eq!(
            stmt.filter,
            Some(Cond::And(vec![
                Cond::Attr("age".to_string(), Op::GreaterThan(json!(18))),
                Cond::Attr("active".to_string(), Op::Equals(json!(true))),
            ]))
        );
        assert_eq!(stmt.order, vec![("age".to_string(), SortDirection::Desc)]);
    }

    #[test]
    fn parses_group_by_then_by() {
        let parsed = parse_method_name("findByActiveGroupByCountryThenByCity").unwrap();
        assert_eq!(parsed.group, vec!["country".to_string(), "city".to_string()]);
    }

    #[test]
    fn group_by_after_order_by_is_rejected() {
        let err = parse_method_name("findByActiveOrderByAgeGroupByCountry").unwrap_err();
        assert!(matches!(err, QueryError::GroupByAfterOrderBy));
    }

    #[test]
    fn unrecognised_prefix_is_unsupported() {
        let err = parse_method_name("deleteEverythingNow").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedMethod(_)));
    }
}
