//! Storage and display names for staged payloads.
//!
//! Every name carries a nanosecond timestamp so concurrent sends never
//! write to the same object key.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    /// Name shown to the receiver and recorded on the transfer.
    pub display_name: String,
    /// Key under which the bytes are staged.
    pub object_key: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectNaming {
    nanos: i64,
}

impl ObjectNaming {
    pub fn at(nanos: i64) -> Self {
        Self { nanos }
    }

    pub fn text(&self) -> ObjectName {
        let display_name = format!("text_{}.txt", self.nanos);
        ObjectName {
            object_key: format!("texts/{display_name}"),
            display_name,
            content_type: "text/plain; charset=utf-8",
        }
    }

    pub fn file(&self, original_name: &str) -> ObjectName {
        let display_name = sanitize_file_name(original_name);
        ObjectName {
            object_key: format!("files/{}_{}", self.nanos, display_name),
            display_name,
            content_type: "application/octet-stream",
        }
    }

    pub fn archive(&self) -> ObjectName {
        let display_name = format!("files_{}.zip", self.nanos);
        ObjectName {
            object_key: format!("files/{}_{}", self.nanos, display_name),
            display_name,
            content_type: "application/zip",
        }
    }
}

/// Keeps only the final path component of a client-supplied file name.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();

    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}
