//! Results document rendering. One `<results>` root per request frame, one
//! child per input child, in document order.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;

use super::request::ProtocolError;

/// Last-resort document when even the renderer fails.
const FALLBACK_ERROR_DOCUMENT: &str = "<results><error>internal error</error></results>";

/// One matched quantity at one price, as reported to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub shares: Decimal,
    pub price: Decimal,
    pub time: i64,
}

/// The status child rendered inside `<status>`. Fully-executed orders carry
/// no status child, only their `<executed>` history.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusState {
    Open { shares: Decimal },
    Canceled { shares: Decimal, time: i64 },
    Executed,
}

/// One result element, mirroring one input child.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultItem {
    CreatedAccount {
        id: String,
    },
    CreatedPosition {
        sym: String,
        account_id: String,
    },
    Opened {
        sym: String,
        amount: Decimal,
        limit: Decimal,
        id: i64,
    },
    Canceled {
        id: i64,
        executions: Vec<Fill>,
        /// Unfilled shares refunded at cancel, with the cancel time.
        leftover: Option<(Decimal, i64)>,
    },
    Status {
        id: i64,
        state: StatusState,
        executions: Vec<Fill>,
    },
    /// Echoes the failing child's identifying attributes around the message.
    Error {
        attrs: Vec<(String, String)>,
        message: String,
    },
}

/// Canonical plain decimal rendering: no exponent, trailing zeros trimmed.
pub fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn render_results(items: &[ResultItem]) -> Result<String, ProtocolError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(BytesStart::new("results")))?;
    for item in items {
        write_item(&mut writer, item)?;
    }
    writer.write_event(Event::End(BytesEnd::new("results")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|_| ProtocolError::Malformed("rendered document is not UTF-8".into()))
}

/// A whole-request failure (framing, parse) as a single-error document.
pub fn error_document(message: &str) -> String {
    render_results(&[ResultItem::Error {
        attrs: Vec::new(),
        message: message.to_string(),
    }])
    .unwrap_or_else(|_| FALLBACK_ERROR_DOCUMENT.to_string())
}

fn write_item(writer: &mut Writer<Vec<u8>>, item: &ResultItem) -> Result<(), ProtocolError> {
    match item {
        ResultItem::CreatedAccount { id } => {
            let mut el = BytesStart::new("created");
            el.push_attribute(("id", id.as_str()));
            writer.write_event(Event::Empty(el))?;
        }
        ResultItem::CreatedPosition { sym, account_id } => {
            let mut el = BytesStart::new("created");
            el.push_attribute(("sym", sym.as_str()));
            el.push_attribute(("id", account_id.as_str()));
            writer.write_event(Event::Empty(el))?;
        }
        ResultItem::Opened {
            sym,
            amount,
            limit,
            id,
        } => {
            let mut el = BytesStart::new("opened");
            el.push_attribute(("sym", sym.as_str()));
            el.push_attribute(("amount", fmt_decimal(*amount).as_str()));
            el.push_attribute(("limit", fmt_decimal(*limit).as_str()));
            el.push_attribute(("id", id.to_string().as_str()));
            writer.write_event(Event::Empty(el))?;
        }
        ResultItem::Canceled {
            id,
            executions,
            leftover,
        } => {
            let mut el = BytesStart::new("canceled");
            el.push_attribute(("id", id.to_string().as_str()));
            writer.write_event(Event::Start(el))?;
            for fill in executions {
                write_fill(writer, fill)?;
            }
            if let Some((shares, time)) = leftover {
                let mut el = BytesStart::new("canceled");
                el.push_attribute(("shares", fmt_decimal(*shares).as_str()));
                el.push_attribute(("time", time.to_string().as_str()));
                writer.write_event(Event::Empty(el))?;
            }
            writer.write_event(Event::End(BytesEnd::new("canceled")))?;
        }
        ResultItem::Status {
            id,
            state,
            executions,
        } => {
            let mut el = BytesStart::new("status");
            el.push_attribute(("id", id.to_string().as_str()));
            writer.write_event(Event::Start(el))?;
            match state {
                StatusState::Open { shares } => {
                    let mut el = BytesStart::new("open");
                    el.push_attribute(("shares", fmt_decimal(*shares).as_str()));
                    writer.write_event(Event::Empty(el))?;
                }
                StatusState::Canceled { shares, time } => {
                    let mut el = BytesStart::new("canceled");
                    el.push_attribute(("shares", fmt_decimal(*shares).as_str()));
                    el.push_attribute(("time", time.to_string().as_str()));
                    writer.write_event(Event::Empty(el))?;
                }
                StatusState::Executed => {}
            }
            for fill in executions {
                write_fill(writer, fill)?;
            }
            writer.write_event(Event::End(BytesEnd::new("status")))?;
        }
        ResultItem::Error { attrs, message } => {
            let mut el = BytesStart::new("error");
            for (key, value) in attrs {
                el.push_attribute((key.as_str(), value.as_str()));
            }
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Text(BytesText::new(message)))?;
            writer.write_event(Event::End(BytesEnd::new("error")))?;
        }
    }
    Ok(())
}

fn write_fill(writer: &mut Writer<Vec<u8>>, fill: &Fill) -> Result<(), ProtocolError> {
    let mut el = BytesStart::new("executed");
    el.push_attribute(("shares", fmt_decimal(fill.shares).as_str()));
    el.push_attribute(("price", fmt_decimal(fill.price).as_str()));
    el.push_attribute(("time", fill.time.to_string().as_str()));
    writer.write_event(Event::Empty(el))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn renders_created_and_opened() {
        let doc = render_results(&[
            ResultItem::CreatedAccount { id: "alice".into() },
            ResultItem::CreatedPosition {
                sym: "TEST".into(),
                account_id: "alice".into(),
            },
            ResultItem::Opened {
                sym: "TEST".into(),
                amount: dec!(-100),
                limit: dec!(45),
                id: 7,
            },
        ])
        .unwrap();
        assert_eq!(
            doc,
            r#"<results><created id="alice"/><created sym="TEST" id="alice"/><opened sym="TEST" amount="-100" limit="45" id="7"/></results>"#
        );
    }

    #[test]
    fn renders_cancel_with_fills_and_leftover() {
        let doc = render_results(&[ResultItem::Canceled {
            id: 3,
            executions: vec![Fill {
                shares: dec!(50),
                price: dec!(45),
                time: 1000,
            }],
            leftover: Some((dec!(50), 1100)),
        }])
        .unwrap();
        assert_eq!(
            doc,
            r#"<results><canceled id="3"><executed shares="50" price="45" time="1000"/><canceled shares="50" time="1100"/></canceled></results>"#
        );
    }

    #[test]
    fn renders_status_variants() {
        let open = render_results(&[ResultItem::Status {
            id: 4,
            state: StatusState::Open { shares: dec!(20) },
            executions: vec![],
        }])
        .unwrap();
        assert_eq!(
            open,
            r#"<results><status id="4"><open shares="20"/></status></results>"#
        );

        let executed = render_results(&[ResultItem::Status {
            id: 5,
            state: StatusState::Executed,
            executions: vec![Fill {
                shares: dec!(100),
                price: dec!(45),
                time: 1000,
            }],
        }])
        .unwrap();
        assert_eq!(
            executed,
            r#"<results><status id="5"><executed shares="100" price="45" time="1000"/></status></results>"#
        );
    }

    #[test]
    fn error_text_is_escaped() {
        let doc = render_results(&[ResultItem::Error {
            attrs: vec![("id".into(), "9".into())],
            message: "amount < 1 rejected".into(),
        }])
        .unwrap();
        assert_eq!(
            doc,
            r#"<results><error id="9">amount &lt; 1 rejected</error></results>"#
        );
    }

    #[test]
    fn monetary_values_render_without_trailing_zeros() {
        assert_eq!(fmt_decimal(dec!(5500.00)), "5500");
        assert_eq!(fmt_decimal(dec!(0.50)), "0.5");
        assert_eq!(fmt_decimal(dec!(-100)), "-100");
    }

    #[test]
    fn error_document_wraps_whole_request_failures() {
        assert_eq!(
            error_document("bad frame"),
            "<results><error>bad frame</error></results>"
        );
    }
}
