//! Keyword classifier that files a slide under an organ system.

pub const FALLBACK_CATEGORY: &str = "Other";

/// Checked in order; the first system with a keyword in the text wins.
const SYSTEMS: &[(&str, &[&str])] = &[
    (
        "Endocrine",
        &["adrenal", "pituitary", "thyroid", "parathyroid", "pineal", "islet", "pancreas"],
    ),
    ("Urinary", &["kidney", "ureter", "bladder", "urethra", "renal"]),
    (
        "Digestive",
        &[
            "tongue",
            "tooth",
            "lip",
            "esophagus",
            "stomach",
            "intestine",
            "duodenum",
            "jejunum",
            "ileum",
            "colon",
            "rectum",
            "anal",
            "liver",
            "gallbladder",
            "salivary",
            "parotid",
            "submandibular",
            "sublingual",
        ],
    ),
    (
        "Reproductive",
        &[
            "testis",
            "ovary",
            "uterus",
            "vagina",
            "placenta",
            "mamm",
            "prostate",
            "seminal",
            "epididymis",
            "oviduct",
            "cervix",
            "sperm",
            "penis",
        ],
    ),
    (
        "Nervous Tissue",
        &[
            "nerve",
            "neuron",
            "gangli",
            "spinal cord",
            "cerebr",
            "brain",
            "cerebell",
            "plexus",
            "myelin",
        ],
    ),
    (
        "Cardiovascular",
        &["artery", "vein", "capillary", "heart", "valve", "aorta", "vessel"],
    ),
    (
        "Respiratory",
        &["nasal", "trachea", "bronch", "lung", "larynx", "epiglottis"],
    ),
    ("Lymphatic", &["lymph", "spleen", "thymus", "tonsil"]),
    ("Integumentary", &["skin", "scalp", "hair", "nail", "glandula"]),
    (
        "Muscle Tissue",
        &["muscle", "skeletal", "cardiac", "smooth", "myocardial"],
    ),
    (
        "Connective Tissue",
        &[
            "connective",
            "adipose",
            "cartilage",
            "bone",
            "tendon",
            "ligament",
            "mesentery",
            "blood",
            "marrow",
        ],
    ),
    (
        "The Cell",
        &["cell", "mitosis", "organelle", "nucleus", "golgi", "mitochondria"],
    ),
    ("Epithelium", &["epithel", "mesotheli", "endotheli"]),
];

/// Organ system for a slide, judged from its name and description.
pub fn category_for(name: &str, description: Option<&str>) -> &'static str {
    let text = format!("{name} {}", description.unwrap_or_default()).to_lowercase();
    SYSTEMS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map_or(FALLBACK_CATEGORY, |(system, _)| system)
}
