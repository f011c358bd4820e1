use crate::part::BodyPart;

/// A convenience collector over a fully-decoded set of parts (§4.8 of the
/// expanded spec). Compares the caller's `name` against each part's own
/// `Content-Disposition` name parameter -- the base crate's lineage had
/// this backwards, comparing a part's name against itself.
pub struct MultipartParts {
    parts: Vec<BodyPart>,
}

impl MultipartParts {
    pub fn new(parts: Vec<BodyPart>) -> MultipartParts {
        MultipartParts { parts }
    }

    pub fn parts(&self) -> &[BodyPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<BodyPart> {
        self.parts
    }

    /// All parts whose `Content-Disposition` `name=` parameter equals `name`.
    pub fn fields<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a BodyPart> + 'a {
        self.parts.iter().filter(move |p| {
            p.headers
                .content_disposition()
                .and_then(|cd| cd.name().map(str::to_string))
                .as_deref()
                == Some(name)
        })
    }
}
