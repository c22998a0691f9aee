//! Handler stack driven by markup events.
//!
//! Events are processed strictly one at a time in document order. The
//! machine stops at the first fatal notice; everything parsed up to that
//! point stays in the context but must not be materialized.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;

use super::handler::{Attribute, ElementHandler, Frame, Handler, PassThroughHandler, Scope};
use crate::context::ImportContext;
use crate::error::ImportError;
use crate::notice::NoticeTree;

/// The parsing state machine for one document
pub struct Machine<'a> {
    frames: Vec<Frame>,
    ctx: &'a mut ImportContext,
    notices: &'a mut NoticeTree,
}

impl<'a> Machine<'a> {
    pub fn new(ctx: &'a mut ImportContext, notices: &'a mut NoticeTree) -> Self {
        Self {
            frames: vec![Frame::new("#document", Handler::document())],
            ctx,
            notices,
        }
    }

    /// Element opened: push the handler the parent picks, or a pass-through
    pub fn open(&mut self, name: &str, attrs: &[Attribute]) {
        let child = match self.frames.last() {
            Some(top) if !top.ignore => top.handler.child(name),
            _ => None,
        };
        let mut frame = Frame::new(
            name,
            child.unwrap_or(Handler::PassThrough(PassThroughHandler)),
        );
        let mut scope = Scope::new(&mut *self.ctx, &mut *self.notices, &self.frames);
        frame.ignore = !frame.handler.start(attrs, &mut scope);
        self.frames.push(frame);
    }

    /// Character data goes to the innermost element if it wants it
    pub fn text(&mut self, text: &str) {
        if let Some(top) = self.frames.last_mut() {
            if !top.ignore && top.handler.keeps_text() {
                top.text.push_str(text);
            }
        }
    }

    /// Element closed: finish its handler and hand the value to the parent
    pub fn close(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let Frame {
            element,
            text,
            ignore,
            handler,
        } = frame;
        if ignore {
            return;
        }
        let mut scope = Scope::new(&mut *self.ctx, &mut *self.notices, &self.frames);
        let value = handler.finish(text, &mut scope);
        if let Some(parent) = self.frames.last_mut() {
            if !parent.ignore {
                parent.handler.absorb(&element, value);
            }
        }
    }

    /// Fail if a fatal notice has been recorded
    pub fn check_fatal(&self) -> Result<(), ImportError> {
        if !self.notices.has_fatal_error() {
            return Ok(());
        }
        match self.notices.first_error() {
            Some(notice) => Err(ImportError::Fatal(notice.message.clone())),
            None => Ok(()),
        }
    }

    /// End of input: every element must be closed and the root recognized
    pub fn finish(self) -> Result<(), ImportError> {
        if let Some(open) = self.frames.last().filter(|_| self.frames.len() > 1) {
            return Err(ImportError::Malformed(format!(
                "document ended inside <{}>",
                open.element
            )));
        }
        match self.frames.first().map(|frame| &frame.handler) {
            Some(Handler::Document(document)) if document.seen_root => Ok(()),
            _ => Err(ImportError::Malformed(
                "no <gnc-v2> root element, not a GnuCash XML document".to_string(),
            )),
        }
    }
}

/// Run a whole document through the machine
pub fn parse_document<R: BufRead>(
    input: R,
    ctx: &mut ImportContext,
    notices: &mut NoticeTree,
) -> Result<(), ImportError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().expand_empty_elements = true;

    let mut machine = Machine::new(ctx, notices);
    let mut buf = Vec::new();
    let mut attrs: Vec<Attribute> = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|source| ImportError::Xml {
                position: reader.buffer_position() as u64,
                source,
            })?;
        match event {
            Event::Start(e) => {
                let name = utf8(e.name().as_ref(), reader.buffer_position() as u64)?;
                attrs.clear();
                for attribute in e.attributes() {
                    let attribute = attribute.map_err(|e| ImportError::Xml {
                        position: reader.buffer_position() as u64,
                        source: e.into(),
                    })?;
                    let key = utf8(attribute.key.as_ref(), reader.buffer_position() as u64)?;
                    let value = attribute
                        .unescape_value()
                        .map_err(|source| ImportError::Xml {
                            position: reader.buffer_position() as u64,
                            source,
                        })?;
                    attrs.push((key, value.into_owned()));
                }
                machine.open(&name, &attrs);
                machine.check_fatal()?;
            }
            Event::End(_) => {
                machine.close();
                machine.check_fatal()?;
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|source| ImportError::Xml {
                    position: reader.buffer_position() as u64,
                    source,
                })?;
                machine.text(&text);
            }
            Event::CData(e) => {
                machine.text(&String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    machine.finish()
}

fn utf8(bytes: &[u8], position: u64) -> Result<String, ImportError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ImportError::Malformed(format!("invalid UTF-8 in element name at byte {}", position)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeCode;

    const GUID_ROOT: &str = "00000000000000000000000000000001";
    const GUID_BANK: &str = "00000000000000000000000000000002";

    fn parse(xml: &str) -> (Result<(), ImportError>, ImportContext, NoticeTree) {
        let mut ctx = ImportContext::new();
        let mut notices = NoticeTree::new();
        let result = parse_document(xml.as_bytes(), &mut ctx, &mut notices);
        (result, ctx, notices)
    }

    fn account(id: &str, name: &str, account_type: &str, parent: Option<&str>) -> String {
        let parent = parent
            .map(|p| format!(r#"<act:parent type="guid">{}</act:parent>"#, p))
            .unwrap_or_default();
        format!(
            r#"<gnc:account version="2.0.0">
                 <act:name>{}</act:name>
                 <act:id type="guid">{}</act:id>
                 <act:type>{}</act:type>
                 {}
               </gnc:account>"#,
            name, id, account_type, parent
        )
    }

    #[test]
    fn test_accounts_are_registered() {
        let xml = format!(
            "<gnc-v2><gnc:book version=\"2.0.0\">{}{}</gnc:book></gnc-v2>",
            account(GUID_ROOT, "Root Account", "ROOT", None),
            account(GUID_BANK, "Checking", "BANK", Some(GUID_ROOT)),
        );
        let (result, ctx, notices) = parse(&xml);
        result.unwrap();
        assert!(notices.is_empty(), "{}", notices);
        assert_eq!(ctx.accounts.len(), 2);

        let bank = ctx.accounts.get(GUID_BANK).unwrap();
        assert_eq!(bank.name.as_deref(), Some("Checking"));
        assert_eq!(bank.parent_id(), Some(GUID_ROOT));
        assert_eq!(bank.id.id_type.as_deref(), Some("guid"));
    }

    #[test]
    fn test_unknown_elements_pass_through() {
        let xml = format!(
            r#"<gnc-v2>
                 <gnc:schedxaction version="2.0.0"><sx:name>Rent</sx:name><act:name>x</act:name></gnc:schedxaction>
                 <gnc:book version="2.0.0">
                   <book:slots><slot><slot:key>features</slot:key></slot></book:slots>
                   {}
                 </gnc:book>
               </gnc-v2>"#,
            account(GUID_ROOT, "Root Account", "ROOT", None)
        );
        let (result, ctx, notices) = parse(&xml);
        result.unwrap();
        assert!(notices.is_empty());
        assert_eq!(ctx.accounts.len(), 1);
    }

    #[test]
    fn test_wrong_account_version_aborts() {
        let xml = r#"<gnc-v2><gnc:account version="1.9.9"><act:name>A</act:name></gnc:account></gnc-v2>"#;
        let (result, ctx, notices) = parse(xml);
        assert!(matches!(result, Err(ImportError::Fatal(_))));
        assert_eq!(notices.error_count(), 1);
        assert_eq!(notices.with_code(NoticeCode::VersionUnsupported).len(), 1);
        assert!(ctx.accounts.is_empty());
    }

    #[test]
    fn test_count_data_and_sections_without_book() {
        let xml = format!(
            r#"<gnc-v2><gnc:count-data cd:type="account">1</gnc:count-data>{}</gnc-v2>"#,
            account(GUID_ROOT, "Root Account", "ROOT", None)
        );
        let (result, ctx, _) = parse(&xml);
        result.unwrap();
        assert_eq!(ctx.declared_count("account"), Some(1));
        assert_eq!(ctx.accounts.len(), 1);
    }

    #[test]
    fn test_lots_warned_once_and_skipped() {
        let lots = r#"<act:lots><gnc:lot version="2.0.0"><lot:id type="guid">x</lot:id></gnc:lot></act:lots>"#;
        let xml = format!(
            "<gnc-v2>{}{}</gnc-v2>",
            account(GUID_ROOT, "Root Account", "ROOT", None).replace("</gnc:account>", &format!("{}</gnc:account>", lots)),
            account(GUID_BANK, "Checking", "BANK", Some(GUID_ROOT)).replace("</gnc:account>", &format!("{}</gnc:account>", lots)),
        );
        let (result, ctx, notices) = parse(&xml);
        result.unwrap();
        assert_eq!(notices.with_code(NoticeCode::LotsUnsupported).len(), 1);
        assert_eq!(ctx.accounts.len(), 2);
        let chain = notices.sources_of("LOTS_UNSUPPORTED:act:lots");
        assert_eq!(chain[0].label, "Account \"Root Account\"");
    }

    #[test]
    fn test_slots_and_escaped_text() {
        let xml = format!(
            r#"<gnc-v2><gnc:account version="2.0.0">
                 <act:name>Food &amp; Drink</act:name>
                 <act:id type="guid">{}</act:id>
                 <act:type>EXPENSE</act:type>
                 <act:slots>
                   <slot><slot:key>placeholder</slot:key><slot:value type="string">true</slot:value></slot>
                   <slot><slot:key>color</slot:key><slot:value type="frame">
                     <slot><slot:key>rgb</slot:key><slot:value type="string">#ff0000</slot:value></slot>
                   </slot:value></slot>
                   <slot><slot:key>last-reconcile</slot:key><slot:value type="timespec"><ts:date>2020-01-01 00:00:00 +0000</ts:date></slot:value></slot>
                 </act:slots>
               </gnc:account></gnc-v2>"#,
            GUID_BANK
        );
        let (result, ctx, _) = parse(&xml);
        result.unwrap();
        let entry = ctx.accounts.get(GUID_BANK).unwrap();
        assert_eq!(entry.name.as_deref(), Some("Food & Drink"));
        assert!(entry.is_placeholder());
        assert_eq!(
            crate::gnc::common::slot_str(&entry.slots, "color/rgb"),
            Some("#ff0000")
        );
        assert_eq!(
            crate::gnc::common::slot_str(&entry.slots, "last-reconcile"),
            Some("2020-01-01 00:00:00 +0000")
        );
    }

    #[test]
    fn test_unclosed_document_is_malformed() {
        let (result, _, _) = parse("<gnc-v2><gnc:book>");
        assert!(matches!(
            result,
            Err(ImportError::Malformed(_)) | Err(ImportError::Xml { .. })
        ));
    }

    #[test]
    fn test_mismatched_tags_are_xml_errors() {
        let (result, _, _) = parse("<gnc-v2><gnc:book></gnc:bool></gnc-v2>");
        assert!(matches!(result, Err(ImportError::Xml { .. })));
    }

    #[test]
    fn test_foreign_root_is_rejected() {
        let (result, ctx, _) = parse("<html><body/></html>");
        assert!(matches!(result, Err(ImportError::Malformed(_))));
        assert!(ctx.accounts.is_empty());
    }

    #[test]
    fn test_invalid_account_is_dropped_with_warning() {
        let xml = format!(
            "<gnc-v2>{}{}</gnc-v2>",
            account(GUID_ROOT, "Root Account", "ROOT", None),
            account("not-a-guid", "Broken", "BANK", Some(GUID_ROOT)),
        );
        let (result, ctx, notices) = parse(&xml);
        result.unwrap();
        assert_eq!(ctx.accounts.len(), 1);
        assert_eq!(notices.with_code(NoticeCode::InvalidGuid).len(), 1);
    }
}
