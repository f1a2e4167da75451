//! System font discovery for the overlay

use ab_glyph::{FontArc, FontVec};
use anyhow::{Context, Result, anyhow};
use fontdb::{Database, Family, Query, Source, Weight};
use std::fs;

/// Fallback families tried after the configured one
const PREFERRED_FAMILIES: &[&str] = &["Inter", "Noto Sans", "DejaVu Sans", "Cantarell"];

/// Bold face for the clock, regular face for everything else and for
/// the thinner ambient clock
#[derive(Clone)]
pub struct Fonts {
    pub regular: FontArc,
    pub bold: FontArc,
}

impl Fonts {
    pub fn load(preferred: Option<&str>) -> Result<Self> {
        let mut db = Database::new();
        db.load_system_fonts();

        let regular = query_font(&db, preferred, Weight::NORMAL)?
            .or_else(|| first_face(&db))
            .ok_or_else(|| anyhow!("no usable system font found"))?;
        let bold = query_font(&db, preferred, Weight::BOLD)?.unwrap_or_else(|| regular.clone());

        Ok(Self { regular, bold })
    }
}

fn query_font(db: &Database, preferred: Option<&str>, weight: Weight) -> Result<Option<FontArc>> {
    let mut families: Vec<Family<'_>> = Vec::new();
    if let Some(name) = preferred {
        families.push(Family::Name(name));
    }
    families.extend(PREFERRED_FAMILIES.iter().map(|name| Family::Name(name)));
    families.push(Family::SansSerif);

    for family in families {
        if let Some(id) = db.query(&Query {
            families: &[family],
            weight,
            ..Default::default()
        }) && let Some(font) = load_face(db, id)?
        {
            return Ok(Some(font));
        }
    }
    Ok(None)
}

fn first_face(db: &Database) -> Option<FontArc> {
    db.faces()
        .find_map(|face| load_face(db, face.id).ok().flatten())
}

fn load_face(db: &Database, id: fontdb::ID) -> Result<Option<FontArc>> {
    let face = db.face(id).context("missing font face in database")?;
    let data = match &face.source {
        Source::Binary(data) => data.as_ref().as_ref().to_vec(),
        Source::File(path) => fs::read(path)
            .with_context(|| format!("failed to read font at {}", path.display()))?,
        Source::SharedFile(_, data) => data.as_ref().as_ref().to_vec(),
    };

    match FontVec::try_from_vec_and_index(data, face.index) {
        Ok(font) => Ok(Some(FontArc::new(font))),
        Err(e) => {
            log::debug!("Skipping undecodable font face {:?}: {}", face.post_script_name, e);
            Ok(None)
        }
    }
}
