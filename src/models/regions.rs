//! Voivodeships and their principal cities.
//!
//! The order of this table is the crawl order of `live-all` and
//! `live-all-cities`. Appending is safe; reordering changes where an
//! interrupted multi-scope run picks up.

/// A voivodeship with the cities crawled in per-city mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voivodeship {
    pub name: &'static str,
    pub cities: &'static [&'static str],
}

pub const VOIVODESHIPS: &[Voivodeship] = &[
    Voivodeship {
        name: "dolnośląskie",
        cities: &["Wrocław", "Wałbrzych", "Legnica", "Jelenia Góra"],
    },
    Voivodeship {
        name: "kujawsko-pomorskie",
        cities: &["Bydgoszcz", "Toruń", "Włocławek", "Grudziądz"],
    },
    Voivodeship {
        name: "lubelskie",
        cities: &["Lublin", "Zamość", "Chełm", "Biała Podlaska"],
    },
    Voivodeship {
        name: "lubuskie",
        cities: &["Zielona Góra", "Gorzów Wielkopolski"],
    },
    Voivodeship {
        name: "łódzkie",
        cities: &["Łódź", "Piotrków Trybunalski", "Pabianice"],
    },
    Voivodeship {
        name: "małopolskie",
        cities: &["Kraków", "Tarnów", "Nowy Sącz"],
    },
    Voivodeship {
        name: "mazowieckie",
        cities: &["Warszawa", "Radom", "Płock", "Siedlce"],
    },
    Voivodeship {
        name: "opolskie",
        cities: &["Opole", "Kędzierzyn-Koźle", "Nysa"],
    },
    Voivodeship {
        name: "podkarpackie",
        cities: &["Rzeszów", "Przemyśl", "Stalowa Wola"],
    },
    Voivodeship {
        name: "podlaskie",
        cities: &["Białystok", "Suwałki", "Łomża"],
    },
    Voivodeship {
        name: "pomorskie",
        cities: &["Gdańsk", "Gdynia", "Sopot", "Słupsk"],
    },
    Voivodeship {
        name: "śląskie",
        cities: &["Katowice", "Częstochowa", "Gliwice", "Sosnowiec", "Bielsko-Biała"],
    },
    Voivodeship {
        name: "świętokrzyskie",
        cities: &["Kielce", "Ostrowiec Świętokrzyski"],
    },
    Voivodeship {
        name: "warmińsko-mazurskie",
        cities: &["Olsztyn", "Elbląg", "Ełk"],
    },
    Voivodeship {
        name: "wielkopolskie",
        cities: &["Poznań", "Kalisz", "Konin", "Piła"],
    },
    Voivodeship {
        name: "zachodniopomorskie",
        cities: &["Szczecin", "Koszalin", "Stargard"],
    },
];

/// Find the voivodeship a city belongs to, matching on the slug.
pub fn region_of(city: &str) -> Option<&'static Voivodeship> {
    let wanted = crate::utils::slug(city);
    VOIVODESHIPS.iter().find(|v| {
        v.cities
            .iter()
            .any(|c| crate::utils::slug(c) == wanted)
    })
}
