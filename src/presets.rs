//! Built-in art technique and background presets.
//!
//! A style value in the config or on the command line may name a preset by
//! slug (`art-deco`), by display name (`Art Deco`) or by number (`6`). It is
//! then expanded to the preset's full prompt description. Anything else is
//! used verbatim, so free-form styles keep working.

/// A named style with its prompt description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
}

impl Preset {
    /// Lowercase, dash-separated form of the name (`Japanese Ukiyo-e` →
    /// `japanese-ukiyo-e`).
    pub fn slug(&self) -> String {
        slugify(self.name)
    }
}

pub const TECHNIQUES: &[Preset] = &[
    Preset {
        name: "Vintage Lithograph",
        description: "vintage lithograph with rich earthy tones and fine crosshatching",
    },
    Preset {
        name: "Watercolor",
        description: "loose watercolor illustration with soft edges and color bleeds",
    },
    Preset {
        name: "Digital Ink",
        description: "clean digital ink illustration with bold outlines and flat colors",
    },
    Preset {
        name: "Woodcut Engraving",
        description: "traditional woodcut engraving with dramatic black and white contrast",
    },
    Preset {
        name: "Art Nouveau",
        description: "elegant Art Nouveau style with flowing organic lines and decorative flourishes",
    },
    Preset {
        name: "Art Deco",
        description: "geometric Art Deco style with bold shapes, gold accents, and symmetrical patterns",
    },
    Preset {
        name: "Japanese Ukiyo-e",
        description: "traditional Japanese ukiyo-e woodblock print style with flat colors and bold outlines",
    },
    Preset {
        name: "Stained Glass",
        description: "medieval stained glass window style with bold black outlines and jewel-tone colors",
    },
    Preset {
        name: "Illuminated Manuscript",
        description: "ornate illuminated manuscript style with gold leaf details and intricate borders",
    },
    Preset {
        name: "Pop Art",
        description: "bold pop art style with halftone dots, primary colors, and comic book aesthetics",
    },
    Preset {
        name: "Steampunk",
        description: "detailed steampunk illustration with brass gears, Victorian machinery, and sepia tones",
    },
    Preset {
        name: "Pixel Art",
        description: "retro pixel art style with limited color palette and crisp 16-bit aesthetic",
    },
    Preset {
        name: "Chalk Pastel",
        description: "soft chalk pastel illustration with textured strokes and blended colors",
    },
    Preset {
        name: "Etching",
        description: "detailed copper plate etching with fine lines and crosshatch shading",
    },
    Preset {
        name: "Risograph",
        description: "modern risograph print style with limited spot colors and slight misregistration",
    },
    Preset {
        name: "Tarot Card",
        description: "mystical tarot card illustration with symbolic imagery and ornate gold details",
    },
];

pub const BACKGROUNDS: &[Preset] = &[
    Preset {
        name: "Parchment",
        description: "vintage aged parchment paper with subtle tea stains and worn edges",
    },
    Preset {
        name: "Clean White",
        description: "pristine bright white premium card stock",
    },
    Preset {
        name: "Dark Marble",
        description: "luxurious dark marbled stone texture with gold veining",
    },
    Preset {
        name: "Soft Gradient",
        description: "smooth subtle neutral gradient from cream to white",
    },
    Preset {
        name: "Velvet Black",
        description: "rich deep black velvet texture",
    },
    Preset {
        name: "Crimson Red",
        description: "deep royal crimson red with subtle fabric texture",
    },
    Preset {
        name: "Forest Green",
        description: "classic forest green felt texture like a poker table",
    },
    Preset {
        name: "Navy Blue",
        description: "sophisticated navy blue with subtle linen texture",
    },
    Preset {
        name: "Gold Foil",
        description: "shimmering brushed gold foil metallic surface",
    },
    Preset {
        name: "Silver Metallic",
        description: "sleek brushed silver metallic surface",
    },
    Preset {
        name: "Kraft Paper",
        description: "natural brown kraft paper with visible fibers",
    },
    Preset {
        name: "Starry Night",
        description: "deep cosmic blue-black with scattered tiny stars",
    },
    Preset {
        name: "Wood Grain",
        description: "warm polished mahogany wood grain texture",
    },
    Preset {
        name: "Concrete",
        description: "modern industrial concrete texture with subtle variations",
    },
    Preset {
        name: "Watercolor Wash",
        description: "soft abstract watercolor wash in muted tones",
    },
    Preset {
        name: "Leather",
        description: "rich embossed leather texture in burgundy",
    },
];

fn slugify(name: &str) -> String {
    name.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Look up a preset by 1-based number, slug or name.
pub fn find<'a>(presets: &'a [Preset], value: &str) -> Option<&'a Preset> {
    let value = value.trim();
    if let Ok(n) = value.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| presets.get(i));
    }
    let wanted = slugify(value);
    presets.iter().find(|p| p.slug() == wanted)
}

/// Expand `value` to a preset description if it names one, otherwise return
/// it unchanged.
pub fn resolve(presets: &[Preset], value: &str) -> String {
    find(presets, value)
        .map(|p| p.description.to_string())
        .unwrap_or_else(|| value.to_string())
}
