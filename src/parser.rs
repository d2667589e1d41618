//! Parse schema source into AST using PEST.

use crate::ast::*;
use crate::layout::SchemaError;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// Parse schema source into AST. Does not resolve offsets or struct references.
pub fn parse(source: &str) -> Result<Schema, SchemaError> {
    let pairs = SchemaParser::parse(Rule::schema, source)
        .map_err(|e| SchemaError::Syntax(e.to_string()))?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| SchemaError::Syntax("empty parse".to_string()))?;
    Ok(Schema {
        items: build_items(pair)?,
    })
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn malformed(what: &str, line: usize) -> SchemaError {
    SchemaError::Syntax(format!("line {}: malformed {}", line, what))
}

/// Collect the statements of `schema` or `block`.
fn build_items(pair: Pair<Rule>) -> Result<Vec<Item>, SchemaError> {
    let mut items = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::directive => items.push(Item::Directive(build_directive(inner)?)),
            Rule::definition => items.push(Item::Definition(build_definition(inner)?)),
            Rule::struct_stmt => items.push(Item::Struct(build_struct(inner)?)),
            _ => {}
        }
    }
    Ok(items)
}

fn build_directive(pair: Pair<Rule>) -> Result<Directive, SchemaError> {
    let line = line_of(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| malformed("directive", line))?;
    let rule = inner.as_rule();
    let arg = inner
        .into_inner()
        .find(|p| matches!(p.as_rule(), Rule::number | Rule::string))
        .ok_or_else(|| malformed("directive argument", line))?
        .as_str()
        .to_string();
    let kind = match rule {
        Rule::seekto => DirectiveKind::SeekTo(arg),
        Rule::seek => DirectiveKind::Seek(arg),
        Rule::printoffset => DirectiveKind::PrintOffset(arg.trim_matches('"').to_string()),
        other => return Err(SchemaError::Syntax(format!("line {}: unknown directive {:?}", line, other))),
    };
    Ok(Directive { kind, line })
}

fn build_definition(pair: Pair<Rule>) -> Result<Definition, SchemaError> {
    let line = line_of(&pair);
    let mut type_name = None;
    let mut declarator = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_name => type_name = Some(inner.as_str().to_string()),
            Rule::bitfield => declarator = Some(build_bitfield(inner)?),
            Rule::array_decl | Rule::scalar_decl => declarator = Some(build_declarator(inner)?),
            _ => {}
        }
    }
    Ok(Definition {
        type_name: type_name.ok_or_else(|| malformed("definition type", line))?,
        declarator: declarator.ok_or_else(|| malformed("definition name", line))?,
        line,
    })
}

fn build_bitfield(pair: Pair<Rule>) -> Result<Declarator, SchemaError> {
    let line = line_of(&pair);
    let mut members = Vec::new();
    for bitdef in pair.into_inner().filter(|p| p.as_rule() == Rule::bitdef) {
        let mut it = bitdef.into_inner();
        let name = it.next().ok_or_else(|| malformed("bit member name", line))?;
        let width = it.next().ok_or_else(|| malformed("bit member width", line))?;
        members.push(BitMember {
            name: name.as_str().to_string(),
            width: width.as_str().to_string(),
        });
    }
    Ok(Declarator::Bitfield(members))
}

fn build_declarator(pair: Pair<Rule>) -> Result<Declarator, SchemaError> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::scalar_decl => {
            let name = pair
                .into_inner()
                .next()
                .ok_or_else(|| malformed("declarator", line))?;
            Ok(Declarator::Scalar(name.as_str().to_string()))
        }
        Rule::array_decl => {
            let mut it = pair.into_inner();
            let name = it.next().ok_or_else(|| malformed("array name", line))?;
            let count = it.next().ok_or_else(|| malformed("array length", line))?;
            Ok(Declarator::Array {
                name: name.as_str().to_string(),
                count: count.as_str().to_string(),
            })
        }
        other => Err(SchemaError::Syntax(format!(
            "line {}: unexpected declarator {:?}",
            line, other
        ))),
    }
}

fn build_struct(pair: Pair<Rule>) -> Result<StructItem, SchemaError> {
    let line = line_of(&pair);
    let inner = pair
        .into_inner()
        .find(|p| matches!(p.as_rule(), Rule::struct_defn | Rule::struct_decl))
        .ok_or_else(|| malformed("struct", line))?;
    let kind = match inner.as_rule() {
        Rule::struct_defn => {
            let mut it = inner.into_inner();
            let name = it.next().ok_or_else(|| malformed("struct name", line))?;
            let block = it.next().ok_or_else(|| malformed("struct body", line))?;
            StructKind::Define {
                name: name.as_str().to_string(),
                body: build_items(block)?,
            }
        }
        _ => {
            let mut it = inner.into_inner();
            let head = it.next().ok_or_else(|| malformed("struct body", line))?;
            let body = match head.as_rule() {
                Rule::ident => StructBody::Named(head.as_str().to_string()),
                _ => StructBody::Inline(build_items(head)?),
            };
            let decl = it.next().ok_or_else(|| malformed("struct declarator", line))?;
            StructKind::Declare {
                body,
                declarator: build_declarator(decl)?,
            }
        }
    };
    Ok(StructItem { kind, line })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bitfield_members_in_order() {
        let schema = parse("u8 a:1, b:3, c:4;").expect("parse");
        match &schema.items[0] {
            Item::Definition(d) => match &d.declarator {
                Declarator::Bitfield(m) => {
                    let names: Vec<_> = m.iter().map(|b| b.name.as_str()).collect();
                    assert_eq!(names, ["a", "b", "c"]);
                    assert_eq!(m[1].width, "3");
                }
                other => panic!("expected bitfield, got {:?}", other),
            },
            other => panic!("expected definition, got {:?}", other),
        }
    }

    #[test]
    fn seek_is_not_confused_with_seekto() {
        let schema = parse("#seek 4;\n#seekto 0x10;").expect("parse");
        let kinds: Vec<_> = schema
            .items
            .iter()
            .map(|i| match i {
                Item::Directive(d) => d.kind.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                DirectiveKind::Seek("4".to_string()),
                DirectiveKind::SeekTo("0x10".to_string())
            ]
        );
    }

    #[test]
    fn records_source_lines() {
        let schema = parse("u8 a;\n\n// comment\nu16 b;").expect("parse");
        assert_eq!(schema.items[0].line(), 1);
        assert_eq!(schema.items[1].line(), 4);
    }
}
