use std::collections::BTreeMap;

/// An age band with an inclusive lower bound. The upper bound is implied by
/// the next band; the last band has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeBand {
    pub label: &'static str,
    pub min_age: u32,
    /// Maximum rating per system, as `(system, rating)` pairs.
    pub max_ratings: &'static [(&'static str, &'static str)],
}

/// Ordered, non-overlapping, starting at zero.
pub const AGE_BANDS: &[AgeBand] = &[
    AgeBand {
        label: "toddler",
        min_age: 0,
        max_ratings: &[
            ("csm", "2+"),
            ("esrb", "E"),
            ("mpaa", "G"),
            ("pegi", "3"),
            ("tv", "TV-Y"),
        ],
    },
    AgeBand {
        label: "child",
        min_age: 5,
        max_ratings: &[
            ("csm", "7+"),
            ("esrb", "E"),
            ("mpaa", "PG"),
            ("pegi", "7"),
            ("tv", "TV-Y7"),
        ],
    },
    AgeBand {
        label: "preteen",
        min_age: 10,
        max_ratings: &[
            ("csm", "10+"),
            ("esrb", "E10+"),
            ("mpaa", "PG"),
            ("pegi", "12"),
            ("tv", "TV-PG"),
        ],
    },
    AgeBand {
        label: "teen",
        min_age: 13,
        max_ratings: &[
            ("csm", "13+"),
            ("esrb", "T"),
            ("mpaa", "PG-13"),
            ("pegi", "16"),
            ("tv", "TV-14"),
        ],
    },
    AgeBand {
        label: "young_adult",
        min_age: 17,
        max_ratings: &[
            ("csm", "17+"),
            ("esrb", "M"),
            ("mpaa", "R"),
            ("pegi", "18"),
            ("tv", "TV-MA"),
        ],
    },
];

/// The band containing `age`. Ages past the last lower bound fall into the
/// last band.
pub fn band_for(age: u32) -> &'static AgeBand {
    AGE_BANDS
        .iter()
        .rev()
        .find(|band| age >= band.min_age)
        .unwrap_or(&AGE_BANDS[0])
}

impl AgeBand {
    pub fn ratings(&self) -> BTreeMap<String, String> {
        self.max_ratings
            .iter()
            .map(|(system, rating)| (system.to_string(), rating.to_string()))
            .collect()
    }
}
