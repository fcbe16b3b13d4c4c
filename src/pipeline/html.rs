use regex::{Captures, Regex};

pub struct HtmlTextExtractor {
    hidden_blocks: Regex,
    comments: Regex,
    tags: Regex,
    numeric_entities: Regex,
}

impl HtmlTextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            hidden_blocks: Regex::new(
                r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<template\b.*?</template\s*>|<svg\b.*?</svg\s*>",
            )?,
            comments: Regex::new(r"(?s)<!--.*?-->")?,
            tags: Regex::new(r"(?s)<[^>]*>")?,
            numeric_entities: Regex::new(r"&#(?:x([0-9a-fA-F]{1,6})|([0-9]{1,7}));")?,
        })
    }

    pub fn extract(&self, html: &str) -> String {
        let text = self.hidden_blocks.replace_all(html, " ");
        let text = self.comments.replace_all(&text, " ");
        let text = self.tags.replace_all(&text, " ");
        let text = self
            .numeric_entities
            .replace_all(&text, |caps: &Captures<'_>| decode_numeric_entity(caps));
        let text = decode_named_entities(&text);
        normalize_whitespace(&text)
    }
}

fn decode_numeric_entity(caps: &Captures<'_>) -> String {
    let code = match (caps.get(1), caps.get(2)) {
        (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
        (None, Some(decimal)) => decimal.as_str().parse::<u32>().ok(),
        _ => None,
    };
    code.and_then(char::from_u32)
        .map(|c| c.to_string())
        .unwrap_or_else(|| " ".to_string())
}

fn decode_named_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rdquo;", "\u{201d}")
        .replace("&ldquo;", "\u{201c}")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&copy;", "\u{a9}")
        .replace("&amp;", "&")
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}
