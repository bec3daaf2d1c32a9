//! Named fake-data generators used by the anonymiser.

use fake::faker::address::en::{CityName, CountryName, StateName, StreetName, ZipCode};
use fake::faker::boolean::en::Boolean;
use fake::faker::company::en::CompanyName;
use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::internet::en::{Password, SafeEmail, Username, IPv4, IPv6};
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use uuid::Uuid;

use crate::core::Value;

/// A fake-data generator, looked up by name from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generator {
    FirstName,
    LastName,
    Name,
    Email,
    Username,
    Password,
    Phone,
    Company,
    Street,
    City,
    State,
    ZipCode,
    Country,
    IPv4,
    IPv6,
    Uuid,
    Word,
    Sentence,
    Paragraph,
    CreditCard,
    Number,
    Bool,
}

/// Accepted names, already normalised.
const NAMES: &[(&str, Generator)] = &[
    ("firstname", Generator::FirstName),
    ("lastname", Generator::LastName),
    ("name", Generator::Name),
    ("fullname", Generator::Name),
    ("email", Generator::Email),
    ("emailaddress", Generator::Email),
    ("safeemail", Generator::Email),
    ("username", Generator::Username),
    ("password", Generator::Password),
    ("phone", Generator::Phone),
    ("phonenumber", Generator::Phone),
    ("company", Generator::Company),
    ("companyname", Generator::Company),
    ("street", Generator::Street),
    ("streetname", Generator::Street),
    ("city", Generator::City),
    ("state", Generator::State),
    ("zip", Generator::ZipCode),
    ("zipcode", Generator::ZipCode),
    ("postalcode", Generator::ZipCode),
    ("country", Generator::Country),
    ("ip", Generator::IPv4),
    ("ipv4", Generator::IPv4),
    ("ipaddress", Generator::IPv4),
    ("ipv6", Generator::IPv6),
    ("uuid", Generator::Uuid),
    ("word", Generator::Word),
    ("sentence", Generator::Sentence),
    ("paragraph", Generator::Paragraph),
    ("lorem", Generator::Paragraph),
    ("creditcard", Generator::CreditCard),
    ("creditcardnumber", Generator::CreditCard),
    ("number", Generator::Number),
    ("integer", Generator::Number),
    ("bool", Generator::Bool),
    ("boolean", Generator::Bool),
];

/// `FirstName`, `first_name` and `first name` all name the same generator.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl Generator {
    /// Find a generator by name.
    pub fn lookup(name: &str) -> Option<Generator> {
        let key = normalize(name);
        NAMES.iter().find(|(n, _)| *n == key).map(|(_, g)| *g)
    }

    /// Produce a fresh value.
    pub fn generate(&self) -> Value {
        match self {
            Generator::FirstName => Value::Text(FirstName().fake()),
            Generator::LastName => Value::Text(LastName().fake()),
            Generator::Name => Value::Text(Name().fake()),
            Generator::Email => Value::Text(SafeEmail().fake()),
            Generator::Username => Value::Text(Username().fake()),
            Generator::Password => Value::Text(Password(12..20).fake()),
            Generator::Phone => Value::Text(PhoneNumber().fake()),
            Generator::Company => Value::Text(CompanyName().fake()),
            Generator::Street => Value::Text(StreetName().fake()),
            Generator::City => Value::Text(CityName().fake()),
            Generator::State => Value::Text(StateName().fake()),
            Generator::ZipCode => Value::Text(ZipCode().fake()),
            Generator::Country => Value::Text(CountryName().fake()),
            Generator::IPv4 => Value::Text(IPv4().fake()),
            Generator::IPv6 => Value::Text(IPv6().fake()),
            Generator::Uuid => Value::Text(Uuid::new_v4().to_string()),
            Generator::Word => Value::Text(Word().fake()),
            Generator::Sentence => Value::Text(Sentence(5..10).fake()),
            Generator::Paragraph => Value::Text(Paragraph(3..5).fake()),
            Generator::CreditCard => Value::Text(CreditCardNumber().fake()),
            Generator::Number => Value::Integer((0..1_000_000i64).fake()),
            Generator::Bool => Value::Bool(Boolean(50).fake()),
        }
    }
}
