use std::collections::HashMap;

use log::{debug, trace};

use crate::bits::BitReader;
use crate::result::{Error, Result};
use crate::template::Template;

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
    by_context: HashMap<String, usize>,
    max_start: usize,
}

impl TemplateRegistry {
    pub fn register(&mut self, template: Template) -> Result<()> {
        if self.by_context.contains_key(template.context()) {
            return Err(Error::config(
                template.context().clone(),
                "a template with this context key is already registered",
            ));
        }
        if let Some(header) = template.header() {
            for marker in &header.start {
                let taken = self
                    .templates
                    .iter()
                    .filter_map(|t| t.header())
                    .any(|other| other.start.contains(marker));
                if taken {
                    return Err(Error::config(
                        template.context().clone(),
                        "start marker already claimed by another template",
                    ));
                }
                self.max_start = self.max_start.max(marker.len());
            }
        }
        debug!("registered template {}", template.context());
        self.by_context
            .insert(template.context().clone(), self.templates.len());
        self.templates.push(template);
        Ok(())
    }

    pub fn get(&self, context: &str) -> Option<&Template> {
        self.by_context.get(context).map(|&i| &self.templates[i])
    }

    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.context().as_str())
    }

    // Peeks ahead and returns the template whose start marker matches;
    // the longest marker wins, registration order breaks ties. The
    // reader is left where it was.
    pub fn select(&self, reader: &mut BitReader) -> Result<&Template> {
        let offset = reader.position();
        reader.mark();
        let window = self.max_start.min(reader.len().saturating_sub(offset));
        let peeked = reader.get_bytes(window);
        reader.restore();
        let peeked = peeked?;

        let mut best: Option<(&Template, usize)> = None;
        for template in &self.templates {
            let Some(header) = template.header() else { continue };
            for marker in &header.start {
                if marker.len() <= peeked.len() && peeked[..marker.len()] == marker[..] {
                    let longer = best.map_or(true, |(_, len)| marker.len() > len);
                    if longer {
                        best = Some((template, marker.len()));
                    }
                }
            }
        }
        match best {
            Some((template, _)) => {
                trace!("selected template {} at byte {}", template.context(), offset);
                Ok(template)
            }
            None => Err(Error::Decoding {
                template: "<unknown>".into(),
                field: "<start marker>".into(),
                offset,
                reason: "no registered start marker matches the stream".into(),
            }),
        }
    }

    // Advances byte-by-byte until a start marker matches, for resyncing
    // after a failed decode.
    pub fn find_next(&self, reader: &mut BitReader) -> Option<usize> {
        loop {
            if self.select(reader).is_ok() {
                return Some(reader.position());
            }
            let next = reader.position() + 1;
            if next >= reader.len() {
                return None;
            }
            reader.seek(next);
        }
    }
}
