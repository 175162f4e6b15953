use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct NutritionistStore {
    pool: SqlitePool,
}

/// Account role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Nutritionist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Nutritionist => "nutritionist",
            Role::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::Nutritionist,
        }
    }
}

/// Full account row, including the password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct Nutritionist {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(sqlx::FromRow)]
struct NutritionistRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
}

impl From<NutritionistRow> for Nutritionist {
    fn from(row: NutritionistRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: Role::from_str(&row.role),
        }
    }
}

/// Public profile returned by `/me`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    email: String,
    role: String,
    created_at: String,
    updated_at: String,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            role: Role::from_str(&row.role),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Fields required to insert a new account.
pub struct NewNutritionist<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

impl NutritionistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, account: &NewNutritionist<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO nutritionists (id, name, email, password_hash, role) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(account.id)
        .bind(account.name)
        .bind(account.email)
        .bind(account.password_hash)
        .bind(account.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether an insert failed because the email is already registered.
    pub fn is_duplicate(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM nutritionists WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<Nutritionist>, sqlx::Error> {
        let row: Option<NutritionistRow> = sqlx::query_as(
            "SELECT id, name, email, password_hash, role FROM nutritionists WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Nutritionist::from))
    }

    /// Get the public profile fields for an account.
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, sqlx::Error> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT id, name, email, role, created_at, updated_at FROM nutritionists WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }
}
