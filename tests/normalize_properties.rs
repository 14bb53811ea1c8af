use proptest::prelude::*;

use barri_etl::pipeline::processing::territory::normalize;

const WORDS: &[&str] = &[
    "Gràcia", "Sant", "Martí", "Provençals", "Poble", "Sec", "Vila", "Olímpica", "Horta",
    "Guinardó", "Clot", "Camp", "Arpa", "Sarrià", "Vallvidrera", "Turó", "Peira", "Sagrada",
    "Família", "Pedralbes",
];

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'á' => 'a',
            'è' | 'é' => 'e',
            'í' | 'ï' => 'i',
            'ò' | 'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn name() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(WORDS), 1..5)
}

fn separator() -> impl Strategy<Value = &'static str> {
    prop::sample::select(&[" ", "  ", "\t", " - ", ", "][..])
}

proptest! {
    #[test]
    fn normalize_ignores_case_accents_and_spacing(
        words in name(),
        seps in prop::collection::vec(separator(), 4),
        uppercase in any::<bool>(),
        strip in any::<bool>(),
    ) {
        let canonical = normalize(&words.join(" "));

        let mut variant = String::from(seps[0]);
        for (i, word) in words.iter().enumerate() {
            if i > 0 {
                variant.push_str(seps[i % seps.len()]);
            }
            let mut w = word.to_string();
            if strip {
                w = strip_accents(&w);
            }
            if uppercase {
                w = w.to_uppercase();
            }
            variant.push_str(&w);
        }
        variant.push_str(seps[3]);

        prop_assert_eq!(normalize(&variant), canonical);
    }

    #[test]
    fn normalize_is_idempotent(words in name(), article in prop::sample::select(&["", "el ", "la ", "L'"][..])) {
        let once = normalize(&format!("{}{}", article, words.join(" ")));
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.is_empty());
    }
}
