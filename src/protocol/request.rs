//! Request document parsing.
//!
//! Two roots are accepted:
//!
//! ```xml
//! <create>
//!   <account id="A" balance="1000"/>
//!   <symbol sym="TEST"><account id="A">100</account></symbol>
//! </create>
//!
//! <transactions id="A">
//!   <order sym="TEST" amount="100" limit="50"/>
//!   <cancel id="7"/>
//!   <query id="7"/>
//! </transactions>
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Create(Vec<CreateItem>),
    Transactions {
        account_id: String,
        items: Vec<TxItem>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateItem {
    Account {
        id: String,
        balance: String,
    },
    Symbol {
        sym: String,
        allocations: Vec<SymbolAllocation>,
    },
}

/// One `<account id="...">QUANTITY</account>` entry inside `<symbol>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAllocation {
    pub account_id: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxItem {
    Order {
        sym: String,
        amount: String,
        limit: String,
    },
    Cancel {
        id: String,
    },
    Query {
        id: String,
    },
}

pub fn parse_request(input: &str) -> Result<Request, ProtocolError> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Decl(_) | Event::Comment(_) | Event::DocType(_) | Event::PI(_) => continue,
            Event::Start(e) => {
                return match e.name().as_ref() {
                    b"create" => parse_create(&mut reader),
                    b"transactions" => {
                        let account_id = require_attr(&e, "id")?;
                        parse_transactions(&mut reader, account_id)
                    }
                    other => Err(unexpected_element(other)),
                };
            }
            Event::Empty(e) => {
                return match e.name().as_ref() {
                    b"create" => Ok(Request::Create(Vec::new())),
                    b"transactions" => Ok(Request::Transactions {
                        account_id: require_attr(&e, "id")?,
                        items: Vec::new(),
                    }),
                    other => Err(unexpected_element(other)),
                };
            }
            Event::Eof => return Err(ProtocolError::Malformed("empty document".into())),
            _ => return Err(ProtocolError::Malformed("unexpected content before root".into())),
        }
    }
}

fn parse_create(reader: &mut Reader<&[u8]>) -> Result<Request, ProtocolError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(e) => match e.name().as_ref() {
                b"account" => items.push(CreateItem::Account {
                    id: require_attr(&e, "id")?,
                    balance: require_attr(&e, "balance")?,
                }),
                // A symbol with no account children credits nothing.
                b"symbol" => items.push(CreateItem::Symbol {
                    sym: require_attr(&e, "sym")?,
                    allocations: Vec::new(),
                }),
                other => return Err(unexpected_element(other)),
            },
            Event::Start(e) => match e.name().as_ref() {
                b"symbol" => {
                    let sym = require_attr(&e, "sym")?;
                    let allocations = parse_symbol_allocations(reader)?;
                    items.push(CreateItem::Symbol { sym, allocations });
                }
                other => return Err(unexpected_element(other)),
            },
            Event::End(e) if e.name().as_ref() == b"create" => return Ok(Request::Create(items)),
            Event::Comment(_) => continue,
            Event::Eof => return Err(ProtocolError::Malformed("unclosed <create>".into())),
            _ => return Err(ProtocolError::Malformed("unexpected content in <create>".into())),
        }
    }
}

fn parse_symbol_allocations(
    reader: &mut Reader<&[u8]>,
) -> Result<Vec<SymbolAllocation>, ProtocolError> {
    let mut allocations = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"account" => {
                let account_id = require_attr(&e, "id")?;
                let quantity = read_text_until_end(reader, b"account")?;
                allocations.push(SymbolAllocation {
                    account_id,
                    quantity,
                });
            }
            Event::End(e) if e.name().as_ref() == b"symbol" => return Ok(allocations),
            Event::Comment(_) => continue,
            Event::Eof => return Err(ProtocolError::Malformed("unclosed <symbol>".into())),
            _ => return Err(ProtocolError::Malformed("unexpected content in <symbol>".into())),
        }
    }
}

fn parse_transactions(
    reader: &mut Reader<&[u8]>,
    account_id: String,
) -> Result<Request, ProtocolError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Empty(e) => items.push(tx_item(&e)?),
            Event::Start(e) => {
                let item = tx_item(&e)?;
                expect_end(reader, e.name().as_ref())?;
                items.push(item);
            }
            Event::End(e) if e.name().as_ref() == b"transactions" => {
                return Ok(Request::Transactions { account_id, items });
            }
            Event::Comment(_) => continue,
            Event::Eof => return Err(ProtocolError::Malformed("unclosed <transactions>".into())),
            _ => {
                return Err(ProtocolError::Malformed(
                    "unexpected content in <transactions>".into(),
                ))
            }
        }
    }
}

fn tx_item(e: &BytesStart<'_>) -> Result<TxItem, ProtocolError> {
    match e.name().as_ref() {
        b"order" => Ok(TxItem::Order {
            sym: require_attr(e, "sym")?,
            amount: require_attr(e, "amount")?,
            limit: require_attr(e, "limit")?,
        }),
        b"cancel" => Ok(TxItem::Cancel {
            id: require_attr(e, "id")?,
        }),
        b"query" => Ok(TxItem::Query {
            id: require_attr(e, "id")?,
        }),
        other => Err(unexpected_element(other)),
    }
}

fn read_text_until_end(reader: &mut Reader<&[u8]>, closing: &[u8]) -> Result<String, ProtocolError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::End(e) if e.name().as_ref() == closing => return Ok(text.trim().to_string()),
            Event::Eof => {
                return Err(ProtocolError::Malformed(format!(
                    "unclosed <{}>",
                    String::from_utf8_lossy(closing)
                )))
            }
            _ => return Err(ProtocolError::Malformed("unexpected nested element".into())),
        }
    }
}

fn expect_end(reader: &mut Reader<&[u8]>, closing: &[u8]) -> Result<(), ProtocolError> {
    loop {
        match reader.read_event()? {
            Event::End(e) if e.name().as_ref() == closing => return Ok(()),
            Event::Comment(_) => continue,
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "expected </{}>",
                    String::from_utf8_lossy(closing)
                )))
            }
        }
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, ProtocolError> {
    for attribute in e.attributes() {
        let attribute =
            attribute.map_err(|err| ProtocolError::Malformed(format!("bad attribute: {err}")))?;
        if attribute.key.as_ref() == name.as_bytes() {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn require_attr(e: &BytesStart<'_>, name: &str) -> Result<String, ProtocolError> {
    attr(e, name)?.ok_or_else(|| {
        ProtocolError::Malformed(format!(
            "<{}> missing required attribute \"{name}\"",
            String::from_utf8_lossy(e.name().as_ref())
        ))
    })
}

fn unexpected_element(name: &[u8]) -> ProtocolError {
    ProtocolError::Malformed(format!(
        "unexpected element <{}>",
        String::from_utf8_lossy(name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_with_accounts_and_symbol() {
        let doc = r#"
            <create>
                <account id="alice" balance="10000"/>
                <symbol sym="TEST">
                    <account id="alice">200</account>
                    <account id="bob">50</account>
                </symbol>
            </create>
        "#;
        let request = parse_request(doc).unwrap();
        assert_eq!(
            request,
            Request::Create(vec![
                CreateItem::Account {
                    id: "alice".into(),
                    balance: "10000".into(),
                },
                CreateItem::Symbol {
                    sym: "TEST".into(),
                    allocations: vec![
                        SymbolAllocation {
                            account_id: "alice".into(),
                            quantity: "200".into(),
                        },
                        SymbolAllocation {
                            account_id: "bob".into(),
                            quantity: "50".into(),
                        },
                    ],
                },
            ])
        );
    }

    #[test]
    fn parses_transactions_batch_in_document_order() {
        let doc = r#"
            <transactions id="alice">
                <order sym="TEST" amount="100" limit="50"/>
                <cancel id="3"/>
                <query id="3"/>
            </transactions>
        "#;
        let request = parse_request(doc).unwrap();
        assert_eq!(
            request,
            Request::Transactions {
                account_id: "alice".into(),
                items: vec![
                    TxItem::Order {
                        sym: "TEST".into(),
                        amount: "100".into(),
                        limit: "50".into(),
                    },
                    TxItem::Cancel { id: "3".into() },
                    TxItem::Query { id: "3".into() },
                ],
            }
        );
    }

    #[test]
    fn negative_amount_text_is_preserved() {
        let doc = r#"<transactions id="s"><order sym="X" amount="-100" limit="45"/></transactions>"#;
        let Request::Transactions { items, .. } = parse_request(doc).unwrap() else {
            panic!("expected transactions root");
        };
        assert_eq!(
            items,
            vec![TxItem::Order {
                sym: "X".into(),
                amount: "-100".into(),
                limit: "45".into(),
            }]
        );
    }

    #[test]
    fn empty_roots_yield_empty_batches() {
        assert_eq!(parse_request("<create/>").unwrap(), Request::Create(vec![]));
        assert_eq!(
            parse_request(r#"<transactions id="a"/>"#).unwrap(),
            Request::Transactions {
                account_id: "a".into(),
                items: vec![],
            }
        );
    }

    #[test]
    fn missing_attribute_is_malformed() {
        let err = parse_request(r#"<transactions id="a"><order sym="X" amount="1"/></transactions>"#)
            .unwrap_err();
        assert!(err.to_string().contains("limit"));

        let err = parse_request(r#"<transactions><query id="1"/></transactions>"#).unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn unknown_root_is_rejected() {
        assert!(parse_request("<nonsense/>").is_err());
        assert!(parse_request("").is_err());
        assert!(parse_request("plain text").is_err());
    }

    #[test]
    fn escaped_attribute_values_are_unescaped() {
        let doc = r#"<create><account id="a&amp;b" balance="5"/></create>"#;
        let Request::Create(items) = parse_request(doc).unwrap() else {
            panic!("expected create root");
        };
        assert_eq!(
            items,
            vec![CreateItem::Account {
                id: "a&b".into(),
                balance: "5".into(),
            }]
        );
    }
}
