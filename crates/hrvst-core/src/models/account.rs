use serde::{Deserialize, Serialize};

/// The user an access token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A Harvest ID account. `product` tells Harvest and Forecast accounts apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product: String,
}

impl Account {
    pub fn is_product(&self, product: &str) -> bool {
        self.product.eq_ignore_ascii_case(product.trim())
    }
}

/// Payload of `GET /api/v2/accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsResponse {
    pub user: User,
    #[serde(default)]
    pub accounts: Vec<Account>,
}
