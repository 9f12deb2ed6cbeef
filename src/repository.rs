use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, PgPool, query_builder::QueryBuilder};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    Category, Comment, CommentUpdate, Genre, Review, ReviewUpdate, Title, TitlePayload,
    TitleUpdate, User, UserPayload, UserUpdate,
};

/// Filter and paging parameters for the title listing.
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    /// Exact match on the category slug.
    pub category: Option<String>,
    /// Exact match on a linked genre slug.
    pub genre: Option<String>,
    /// Exact year.
    pub year: Option<i32>,
    /// Case-insensitive prefix match on the name.
    pub name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Repository
///
/// Abstract contract for all persistence operations, shared as a trait object
/// so handlers never depend on the concrete store. Two implementations:
/// `PostgresRepository` for production and `MemoryRepository` for the test
/// suite.
///
/// Methods return `Result` so constraint violations surface as distinguishable
/// errors (`ApiError::Conflict` / `ApiError::Validation`) instead of being
/// swallowed; `Ok(None)` / `Ok(false)` mean the target row did not exist.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn list_users(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ApiError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError>;
    async fn create_user(&self, payload: UserPayload) -> Result<User, ApiError>;
    async fn update_user(
        &self,
        username: &str,
        update: UserUpdate,
    ) -> Result<Option<User>, ApiError>;
    async fn delete_user(&self, username: &str) -> Result<bool, ApiError>;

    // --- Categories ---
    async fn list_categories(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Category>, ApiError>;
    async fn create_category(&self, category: Category) -> Result<Category, ApiError>;
    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError>;

    // --- Genres ---
    async fn list_genres(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Genre>, ApiError>;
    async fn create_genre(&self, genre: Genre) -> Result<Genre, ApiError>;
    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError>;

    // --- Titles ---
    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<Title>, ApiError>;
    async fn get_title(&self, id: Uuid) -> Result<Option<Title>, ApiError>;
    async fn create_title(&self, payload: TitlePayload) -> Result<Title, ApiError>;
    async fn update_title(
        &self,
        id: Uuid,
        update: TitleUpdate,
    ) -> Result<Option<Title>, ApiError>;
    async fn delete_title(&self, id: Uuid) -> Result<bool, ApiError>;

    // --- Reviews ---
    async fn list_reviews(
        &self,
        title_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Review>, ApiError>;
    async fn get_review(&self, title_id: Uuid, review_id: i64)
    -> Result<Option<Review>, ApiError>;
    /// Fails with Conflict when the (title, author) pair already has a review.
    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: String,
        score: i32,
    ) -> Result<Review, ApiError>;
    async fn update_review(
        &self,
        review_id: i64,
        update: ReviewUpdate,
    ) -> Result<Option<Review>, ApiError>;
    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError>;

    // --- Comments ---
    async fn list_comments(
        &self,
        review_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Comment>, ApiError>;
    async fn get_comment(
        &self,
        review_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>, ApiError>;
    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> Result<Comment, ApiError>;
    async fn update_comment(
        &self,
        comment_id: i64,
        update: CommentUpdate,
    ) -> Result<Option<Comment>, ApiError>;
    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError>;
}

/// RepositoryState
///
/// The concrete type used to share persistence access across the application
/// state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, bio, role, is_superuser";

/// Flat row shape for the title aggregate query; nested genre/category are
/// assembled afterwards.
#[derive(Debug, FromRow)]
struct TitleRow {
    id: Uuid,
    name: String,
    year: i32,
    description: String,
    rating: Option<f64>,
    category_name: Option<String>,
    category_slug: Option<String>,
}

#[derive(Debug, FromRow)]
struct GenreLink {
    title_id: Uuid,
    name: String,
    slug: String,
}

impl TitleRow {
    fn into_title(self, genre: Vec<Genre>) -> Title {
        let category = match (self.category_name, self.category_slug) {
            (Some(name), Some(slug)) => Some(Category { name, slug }),
            _ => None,
        };
        Title {
            id: self.id,
            name: self.name,
            year: self.year,
            description: self.description,
            rating: self.rating,
            genre,
            category,
        }
    }
}

/// PostgresRepository
///
/// Production implementation backed by the connection-pooled relational
/// store. All uniqueness and check invariants live in the schema; this layer
/// translates violations into request-level errors.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetches the genre links for a set of titles, ordered by genre name.
    async fn genres_for(&self, title_ids: &[Uuid]) -> Result<Vec<GenreLink>, ApiError> {
        if title_ids.is_empty() {
            return Ok(Vec::new());
        }
        let links = sqlx::query_as::<_, GenreLink>(
            r#"
            SELECT tg.title_id, g.name, g.slug
            FROM title_genres tg
            JOIN genres g ON g.slug = tg.genre_slug
            WHERE tg.title_id = ANY($1)
            ORDER BY g.name
            "#,
        )
        .bind(title_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    fn assemble(rows: Vec<TitleRow>, links: Vec<GenreLink>) -> Vec<Title> {
        let mut by_title: BTreeMap<Uuid, Vec<Genre>> = BTreeMap::new();
        for link in links {
            by_title.entry(link.title_id).or_default().push(Genre {
                name: link.name,
                slug: link.slug,
            });
        }
        rows.into_iter()
            .map(|row| {
                let genre = by_title.remove(&row.id).unwrap_or_default();
                row.into_title(genre)
            })
            .collect()
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// Free-text user search across username, names, and role, using
    /// QueryBuilder for safe parameterization of the optional filter.
    async fn list_users(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT {USER_COLUMNS} FROM users"
        ));

        if let Some(s) = search {
            let pattern = format!("%{}%", s);
            builder.push(" WHERE (username ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR first_name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR last_name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR role::text ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }

        builder.push(" ORDER BY username LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let users = builder
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// The schema repeats the reserved-username rule as a CHECK constraint,
    /// so a write slipping past request validation still fails here.
    async fn create_user(&self, payload: UserPayload) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, first_name, last_name, bio, role, is_superuser)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&payload.username)
        .bind(&payload.email)
        .bind(&payload.first_name)
        .bind(&payload.last_name)
        .bind(&payload.bio)
        .bind(payload.role.unwrap_or_default())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_db(e, "username or email already taken"))?;
        Ok(user)
    }

    /// Partial update via COALESCE: only the provided fields change.
    async fn update_user(
        &self,
        username: &str,
        update: UserUpdate,
    ) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                bio = COALESCE($5, bio),
                role = COALESCE($6, role)
            WHERE username = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(&update.email)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.bio)
        .bind(update.role)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::from_db(e, "email already taken"))?;
        Ok(user)
    }

    /// Cascades to the user's reviews and comments via the schema's foreign
    /// keys.
    async fn delete_user(&self, username: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_categories(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Category>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT name, slug FROM categories");
        if let Some(s) = search {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(format!("%{}%", s));
        }
        builder.push(" ORDER BY name LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let categories = builder
            .build_query_as::<Category>()
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    async fn create_category(&self, category: Category) -> Result<Category, ApiError> {
        let created = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING name, slug",
        )
        .bind(&category.name)
        .bind(&category.slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_db(e, "category name or slug already exists"))?;
        Ok(created)
    }

    /// Titles referencing the category fall back to NULL via ON DELETE SET
    /// NULL.
    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM categories WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_genres(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Genre>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT name, slug FROM genres");
        if let Some(s) = search {
            builder.push(" WHERE name ILIKE ");
            builder.push_bind(format!("%{}%", s));
        }
        builder.push(" ORDER BY name LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let genres = builder
            .build_query_as::<Genre>()
            .fetch_all(&self.pool)
            .await?;
        Ok(genres)
    }

    async fn create_genre(&self, genre: Genre) -> Result<Genre, ApiError> {
        let created = sqlx::query_as::<_, Genre>(
            "INSERT INTO genres (name, slug) VALUES ($1, $2) RETURNING name, slug",
        )
        .bind(&genre.name)
        .bind(&genre.slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_db(e, "genre name or slug already exists"))?;
        Ok(created)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM genres WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Title listing with the derived rating: AVG over the review scores of
    /// each title, NULL when it has none. Filters are appended with
    /// QueryBuilder so every value is a bound parameter.
    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<Title>, ApiError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            SELECT t.id, t.name, t.year, t.description,
                   AVG(r.score)::float8 AS rating,
                   c.name AS category_name, c.slug AS category_slug
            FROM titles t
            LEFT JOIN reviews r ON r.title_id = t.id
            LEFT JOIN categories c ON c.slug = t.category_slug
            WHERE TRUE
            "#,
        );

        if let Some(category) = query.category {
            builder.push(" AND t.category_slug = ");
            builder.push_bind(category);
        }
        if let Some(genre) = query.genre {
            builder.push(
                " AND EXISTS (SELECT 1 FROM title_genres tg WHERE tg.title_id = t.id AND tg.genre_slug = ",
            );
            builder.push_bind(genre);
            builder.push(")");
        }
        if let Some(year) = query.year {
            builder.push(" AND t.year = ");
            builder.push_bind(year);
        }
        if let Some(name) = query.name {
            builder.push(" AND t.name ILIKE ");
            builder.push_bind(format!("{}%", name));
        }

        builder.push(
            " GROUP BY t.id, t.name, t.year, t.description, c.name, c.slug ORDER BY t.name LIMIT ",
        );
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder
            .build_query_as::<TitleRow>()
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let links = self.genres_for(&ids).await?;
        Ok(Self::assemble(rows, links))
    }

    async fn get_title(&self, id: Uuid) -> Result<Option<Title>, ApiError> {
        let row = sqlx::query_as::<_, TitleRow>(
            r#"
            SELECT t.id, t.name, t.year, t.description,
                   AVG(r.score)::float8 AS rating,
                   c.name AS category_name, c.slug AS category_slug
            FROM titles t
            LEFT JOIN reviews r ON r.title_id = t.id
            LEFT JOIN categories c ON c.slug = t.category_slug
            WHERE t.id = $1
            GROUP BY t.id, t.name, t.year, t.description, c.name, c.slug
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let links = self.genres_for(&[row.id]).await?;
                let genre = links
                    .into_iter()
                    .map(|l| Genre {
                        name: l.name,
                        slug: l.slug,
                    })
                    .collect();
                Ok(Some(row.into_title(genre)))
            }
        }
    }

    /// Creates the title and its genre links in one transaction. Unknown
    /// genre or category slugs are a validation error, matching the
    /// serializer behavior of slug-related fields.
    async fn create_title(&self, payload: TitlePayload) -> Result<Title, ApiError> {
        let mut tx = self.pool.begin().await?;

        if let Some(slug) = &payload.category {
            let exists = sqlx::query("SELECT 1 FROM categories WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(ApiError::Validation(format!("unknown category: {slug}")));
            }
        }

        let known: Vec<Genre> =
            sqlx::query_as("SELECT name, slug FROM genres WHERE slug = ANY($1)")
                .bind(&payload.genre)
                .fetch_all(&mut *tx)
                .await?;
        for slug in &payload.genre {
            if !known.iter().any(|g| &g.slug == slug) {
                return Err(ApiError::Validation(format!("unknown genre: {slug}")));
            }
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO titles (id, name, year, description, category_slug) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&payload.name)
        .bind(payload.year)
        .bind(&payload.description)
        .bind(&payload.category)
        .execute(&mut *tx)
        .await?;

        for slug in &payload.genre {
            sqlx::query(
                "INSERT INTO title_genres (title_id, genre_slug) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(slug)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_title(id)
            .await?
            .ok_or_else(|| ApiError::Internal("title vanished after insert".to_string()))
    }

    /// Partial update; a provided genre list replaces the existing links
    /// wholesale inside the same transaction.
    async fn update_title(
        &self,
        id: Uuid,
        update: TitleUpdate,
    ) -> Result<Option<Title>, ApiError> {
        let mut tx = self.pool.begin().await?;

        if let Some(slug) = &update.category {
            let exists = sqlx::query("SELECT 1 FROM categories WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(ApiError::Validation(format!("unknown category: {slug}")));
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE titles
            SET name = COALESCE($2, name),
                year = COALESCE($3, year),
                description = COALESCE($4, description),
                category_slug = COALESCE($5, category_slug)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.year)
        .bind(&update.description)
        .bind(&update.category)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(slugs) = &update.genre {
            let known: Vec<Genre> =
                sqlx::query_as("SELECT name, slug FROM genres WHERE slug = ANY($1)")
                    .bind(slugs)
                    .fetch_all(&mut *tx)
                    .await?;
            for slug in slugs {
                if !known.iter().any(|g| &g.slug == slug) {
                    return Err(ApiError::Validation(format!("unknown genre: {slug}")));
                }
            }

            sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            // A repeated slug in the payload collapses to one link, matching
            // the create path.
            for slug in slugs {
                sqlx::query(
                    "INSERT INTO title_genres (title_id, genre_slug) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(id)
                .bind(slug)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        self.get_title(id).await
    }

    /// Reviews (and their comments) go with the title via the schema's
    /// cascading foreign keys.
    async fn delete_title(&self, id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reviews(
        &self,
        title_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Review>, ApiError> {
        let reviews = sqlx::query_as::<_, Review>(
            r#"
            SELECT r.id, r.text, u.username AS author, r.score, r.pub_date, r.author_id
            FROM reviews r
            JOIN users u ON u.id = r.author_id
            WHERE r.title_id = $1
            ORDER BY r.pub_date, r.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(title_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    async fn get_review(
        &self,
        title_id: Uuid,
        review_id: i64,
    ) -> Result<Option<Review>, ApiError> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            SELECT r.id, r.text, u.username AS author, r.score, r.pub_date, r.author_id
            FROM reviews r
            JOIN users u ON u.id = r.author_id
            WHERE r.id = $1 AND r.title_id = $2
            "#,
        )
        .bind(review_id)
        .bind(title_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(review)
    }

    /// Insert-and-enrich in one statement: the CTE returns the new row joined
    /// with the author's username. The unique (title_id, author_id) index
    /// rejects a second review from the same author.
    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: String,
        score: i32,
    ) -> Result<Review, ApiError> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            WITH inserted AS (
                INSERT INTO reviews (title_id, author_id, text, score)
                VALUES ($1, $2, $3, $4)
                RETURNING id, text, score, pub_date, author_id
            )
            SELECT i.id, i.text, u.username AS author, i.score, i.pub_date, i.author_id
            FROM inserted i
            JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(title_id)
        .bind(author_id)
        .bind(&text)
        .bind(score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::from_db(e, "this title already has a review by this author"))?;
        Ok(review)
    }

    async fn update_review(
        &self,
        review_id: i64,
        update: ReviewUpdate,
    ) -> Result<Option<Review>, ApiError> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            UPDATE reviews r
            SET text = COALESCE($2, r.text),
                score = COALESCE($3, r.score)
            FROM users u
            WHERE r.id = $1 AND u.id = r.author_id
            RETURNING r.id, r.text, u.username AS author, r.score, r.pub_date, r.author_id
            "#,
        )
        .bind(review_id)
        .bind(&update.text)
        .bind(update.score)
        .fetch_optional(&self.pool)
        .await?;
        Ok(review)
    }

    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_comments(
        &self,
        review_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Comment>, ApiError> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT c.id, c.text, u.username AS author, c.pub_date, c.author_id
            FROM comments c
            JOIN users u ON u.id = c.author_id
            WHERE c.review_id = $1
            ORDER BY c.pub_date, c.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(review_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    async fn get_comment(
        &self,
        review_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>, ApiError> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            SELECT c.id, c.text, u.username AS author, c.pub_date, c.author_id
            FROM comments c
            JOIN users u ON u.id = c.author_id
            WHERE c.id = $1 AND c.review_id = $2
            "#,
        )
        .bind(comment_id)
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> Result<Comment, ApiError> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            WITH inserted AS (
                INSERT INTO comments (review_id, author_id, text)
                VALUES ($1, $2, $3)
                RETURNING id, text, pub_date, author_id
            )
            SELECT i.id, i.text, u.username AS author, i.pub_date, i.author_id
            FROM inserted i
            JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(review_id)
        .bind(author_id)
        .bind(&text)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn update_comment(
        &self,
        comment_id: i64,
        update: CommentUpdate,
    ) -> Result<Option<Comment>, ApiError> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            UPDATE comments c
            SET text = COALESCE($2, c.text)
            FROM users u
            WHERE c.id = $1 AND u.id = c.author_id
            RETURNING c.id, c.text, u.username AS author, c.pub_date, c.author_id
            "#,
        )
        .bind(comment_id)
        .bind(&update.text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-memory implementation ---

#[derive(Debug, Clone)]
struct StoredTitle {
    id: Uuid,
    name: String,
    year: i32,
    description: String,
    genre_slugs: Vec<String>,
    category_slug: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredReview {
    id: i64,
    title_id: Uuid,
    author_id: Uuid,
    text: String,
    score: i32,
    pub_date: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredComment {
    id: i64,
    review_id: i64,
    author_id: Uuid,
    text: String,
    pub_date: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct MemoryStore {
    users: Vec<User>,
    categories: Vec<Category>,
    genres: Vec<Genre>,
    titles: Vec<StoredTitle>,
    reviews: Vec<StoredReview>,
    comments: Vec<StoredComment>,
    next_review_id: i64,
    next_comment_id: i64,
}

/// MemoryRepository
///
/// In-memory implementation of the `Repository` contract, used by the test
/// suite in place of Postgres. It enforces the same invariants the schema
/// does (unique username/email, the reserved-username guard, one review per
/// title and author) and performs cascade deletes by explicitly enumerating
/// dependents, since no referential machinery exists here to do it
/// implicitly.
///
/// The mutex is never held across an await point; each call locks, mutates,
/// and releases.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<MemoryStore>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: flips the superuser flag on an existing user. The flag is
    /// provisioned out-of-band in production, so no trait method carries it.
    pub fn make_superuser(&self, username: &str) {
        let mut store = self.store.lock().unwrap();
        if let Some(user) = store.users.iter_mut().find(|u| u.username == username) {
            user.is_superuser = true;
        }
    }

    fn page<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
        items
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect()
    }

    fn build_title(store: &MemoryStore, stored: &StoredTitle) -> Title {
        let mut genre: Vec<Genre> = store
            .genres
            .iter()
            .filter(|g| stored.genre_slugs.contains(&g.slug))
            .cloned()
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name));

        let category = stored.category_slug.as_ref().and_then(|slug| {
            store.categories.iter().find(|c| &c.slug == slug).cloned()
        });

        let scores: Vec<i32> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == stored.id)
            .map(|r| r.score)
            .collect();
        let rating = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<i32>() as f64 / scores.len() as f64)
        };

        Title {
            id: stored.id,
            name: stored.name.clone(),
            year: stored.year,
            description: stored.description.clone(),
            rating,
            genre,
            category,
        }
    }

    fn build_review(store: &MemoryStore, stored: &StoredReview) -> Review {
        let author = store
            .users
            .iter()
            .find(|u| u.id == stored.author_id)
            .map(|u| u.username.clone())
            .unwrap_or_default();
        Review {
            id: stored.id,
            text: stored.text.clone(),
            author,
            score: stored.score,
            pub_date: stored.pub_date,
            author_id: stored.author_id,
        }
    }

    fn build_comment(store: &MemoryStore, stored: &StoredComment) -> Comment {
        let author = store
            .users
            .iter()
            .find(|u| u.id == stored.author_id)
            .map(|u| u.username.clone())
            .unwrap_or_default();
        Comment {
            id: stored.id,
            text: stored.text.clone(),
            author,
            pub_date: stored.pub_date,
            author_id: stored.author_id,
        }
    }

    /// Explicit cascade: a review takes its comments with it.
    fn remove_review(store: &mut MemoryStore, review_id: i64) {
        store.reviews.retain(|r| r.id != review_id);
        store.comments.retain(|c| c.review_id != review_id);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_users(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut users: Vec<User> = store
            .users
            .iter()
            .filter(|u| match &search {
                None => true,
                Some(s) => {
                    let needle = s.to_lowercase();
                    let role = format!("{:?}", u.role).to_lowercase();
                    u.username.to_lowercase().contains(&needle)
                        || u.first_name
                            .as_deref()
                            .is_some_and(|f| f.to_lowercase().contains(&needle))
                        || u.last_name
                            .as_deref()
                            .is_some_and(|l| l.to_lowercase().contains(&needle))
                        || role.contains(&needle)
                }
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(Self::page(users, limit, offset))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.username == username).cloned())
    }

    async fn create_user(&self, payload: UserPayload) -> Result<User, ApiError> {
        let mut store = self.store.lock().unwrap();

        // Mirrors the schema's CHECK (username <> 'me') constraint: even a
        // direct storage write with the sentinel must fail.
        if payload.username == crate::models::RESERVED_USERNAME {
            return Err(ApiError::Validation(
                "constraint violated: username must not be \"me\"".to_string(),
            ));
        }
        if store
            .users
            .iter()
            .any(|u| u.username == payload.username || u.email == payload.email)
        {
            return Err(ApiError::Conflict(
                "username or email already taken".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: payload.username,
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            bio: payload.bio,
            role: payload.role.unwrap_or_default(),
            is_superuser: false,
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        username: &str,
        update: UserUpdate,
    ) -> Result<Option<User>, ApiError> {
        let mut store = self.store.lock().unwrap();

        if let Some(email) = &update.email {
            if store
                .users
                .iter()
                .any(|u| u.username != username && &u.email == email)
            {
                return Err(ApiError::Conflict("email already taken".to_string()));
            }
        }

        let Some(user) = store.users.iter_mut().find(|u| u.username == username) else {
            return Ok(None);
        };
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(first_name) = update.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = update.last_name {
            user.last_name = Some(last_name);
        }
        if let Some(bio) = update.bio {
            user.bio = Some(bio);
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(user) = store.users.iter().find(|u| u.username == username).cloned() else {
            return Ok(false);
        };
        store.users.retain(|u| u.id != user.id);

        // Explicit cascade to authored content, reviews first so their
        // comment subtrees disappear too.
        let review_ids: Vec<i64> = store
            .reviews
            .iter()
            .filter(|r| r.author_id == user.id)
            .map(|r| r.id)
            .collect();
        for id in review_ids {
            Self::remove_review(&mut store, id);
        }
        store.comments.retain(|c| c.author_id != user.id);
        Ok(true)
    }

    async fn list_categories(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Category>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut categories: Vec<Category> = store
            .categories
            .iter()
            .filter(|c| match &search {
                None => true,
                Some(s) => c.name.to_lowercase().contains(&s.to_lowercase()),
            })
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::page(categories, limit, offset))
    }

    async fn create_category(&self, category: Category) -> Result<Category, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store
            .categories
            .iter()
            .any(|c| c.name == category.name || c.slug == category.slug)
        {
            return Err(ApiError::Conflict(
                "category name or slug already exists".to_string(),
            ));
        }
        store.categories.push(category.clone());
        Ok(category)
    }

    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let existed = store.categories.iter().any(|c| c.slug == slug);
        store.categories.retain(|c| c.slug != slug);
        // SET NULL semantics: titles keep existing, their category reference
        // is dropped.
        for title in store.titles.iter_mut() {
            if title.category_slug.as_deref() == Some(slug) {
                title.category_slug = None;
            }
        }
        Ok(existed)
    }

    async fn list_genres(
        &self,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Genre>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut genres: Vec<Genre> = store
            .genres
            .iter()
            .filter(|g| match &search {
                None => true,
                Some(s) => g.name.to_lowercase().contains(&s.to_lowercase()),
            })
            .cloned()
            .collect();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::page(genres, limit, offset))
    }

    async fn create_genre(&self, genre: Genre) -> Result<Genre, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store
            .genres
            .iter()
            .any(|g| g.name == genre.name || g.slug == genre.slug)
        {
            return Err(ApiError::Conflict(
                "genre name or slug already exists".to_string(),
            ));
        }
        store.genres.push(genre.clone());
        Ok(genre)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let existed = store.genres.iter().any(|g| g.slug == slug);
        store.genres.retain(|g| g.slug != slug);
        for title in store.titles.iter_mut() {
            title.genre_slugs.retain(|s| s != slug);
        }
        Ok(existed)
    }

    async fn list_titles(&self, query: TitleQuery) -> Result<Vec<Title>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut titles: Vec<Title> = store
            .titles
            .iter()
            .filter(|t| {
                query
                    .category
                    .as_ref()
                    .is_none_or(|c| t.category_slug.as_ref() == Some(c))
                    && query
                        .genre
                        .as_ref()
                        .is_none_or(|g| t.genre_slugs.contains(g))
                    && query.year.is_none_or(|y| t.year == y)
                    && query
                        .name
                        .as_ref()
                        .is_none_or(|n| t.name.to_lowercase().starts_with(&n.to_lowercase()))
            })
            .map(|t| Self::build_title(&store, t))
            .collect();
        titles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::page(titles, query.limit, query.offset))
    }

    async fn get_title(&self, id: Uuid) -> Result<Option<Title>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .titles
            .iter()
            .find(|t| t.id == id)
            .map(|t| Self::build_title(&store, t)))
    }

    async fn create_title(&self, payload: TitlePayload) -> Result<Title, ApiError> {
        let mut store = self.store.lock().unwrap();

        if let Some(slug) = &payload.category {
            if !store.categories.iter().any(|c| &c.slug == slug) {
                return Err(ApiError::Validation(format!("unknown category: {slug}")));
            }
        }
        for slug in &payload.genre {
            if !store.genres.iter().any(|g| &g.slug == slug) {
                return Err(ApiError::Validation(format!("unknown genre: {slug}")));
            }
        }

        let mut genre_slugs = payload.genre;
        genre_slugs.sort();
        genre_slugs.dedup();
        let stored = StoredTitle {
            id: Uuid::new_v4(),
            name: payload.name,
            year: payload.year,
            description: payload.description,
            genre_slugs,
            category_slug: payload.category,
        };
        let title = Self::build_title(&store, &stored);
        store.titles.push(stored);
        Ok(title)
    }

    async fn update_title(
        &self,
        id: Uuid,
        update: TitleUpdate,
    ) -> Result<Option<Title>, ApiError> {
        let mut store = self.store.lock().unwrap();

        if let Some(slug) = &update.category {
            if !store.categories.iter().any(|c| &c.slug == slug) {
                return Err(ApiError::Validation(format!("unknown category: {slug}")));
            }
        }
        if let Some(slugs) = &update.genre {
            for slug in slugs {
                if !store.genres.iter().any(|g| &g.slug == slug) {
                    return Err(ApiError::Validation(format!("unknown genre: {slug}")));
                }
            }
        }

        let Some(index) = store.titles.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        {
            let title = &mut store.titles[index];
            if let Some(name) = update.name {
                title.name = name;
            }
            if let Some(year) = update.year {
                title.year = year;
            }
            if let Some(description) = update.description {
                title.description = description;
            }
            if let Some(mut genre) = update.genre {
                genre.sort();
                genre.dedup();
                title.genre_slugs = genre;
            }
            if let Some(category) = update.category {
                title.category_slug = Some(category);
            }
        }
        let stored = store.titles[index].clone();
        Ok(Some(Self::build_title(&store, &stored)))
    }

    async fn delete_title(&self, id: Uuid) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let existed = store.titles.iter().any(|t| t.id == id);
        store.titles.retain(|t| t.id != id);

        // Explicit cascade: the title owns its reviews, each review owns its
        // comments.
        let review_ids: Vec<i64> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == id)
            .map(|r| r.id)
            .collect();
        for review_id in review_ids {
            Self::remove_review(&mut store, review_id);
        }
        Ok(existed)
    }

    async fn list_reviews(
        &self,
        title_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Review>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut reviews: Vec<Review> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == title_id)
            .map(|r| Self::build_review(&store, r))
            .collect();
        reviews.sort_by(|a, b| a.pub_date.cmp(&b.pub_date).then(a.id.cmp(&b.id)));
        Ok(Self::page(reviews, limit, offset))
    }

    async fn get_review(
        &self,
        title_id: Uuid,
        review_id: i64,
    ) -> Result<Option<Review>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .reviews
            .iter()
            .find(|r| r.id == review_id && r.title_id == title_id)
            .map(|r| Self::build_review(&store, r)))
    }

    async fn create_review(
        &self,
        title_id: Uuid,
        author_id: Uuid,
        text: String,
        score: i32,
    ) -> Result<Review, ApiError> {
        let mut store = self.store.lock().unwrap();

        if !store.titles.iter().any(|t| t.id == title_id) {
            return Err(ApiError::NotFound("title"));
        }
        // The unique (title, author) pair, enforced the way the schema's
        // unique index would.
        if store
            .reviews
            .iter()
            .any(|r| r.title_id == title_id && r.author_id == author_id)
        {
            return Err(ApiError::Conflict(
                "this title already has a review by this author".to_string(),
            ));
        }

        store.next_review_id += 1;
        let stored = StoredReview {
            id: store.next_review_id,
            title_id,
            author_id,
            text,
            score,
            pub_date: Utc::now(),
        };
        let review = Self::build_review(&store, &stored);
        store.reviews.push(stored);
        Ok(review)
    }

    async fn update_review(
        &self,
        review_id: i64,
        update: ReviewUpdate,
    ) -> Result<Option<Review>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.reviews.iter().position(|r| r.id == review_id) else {
            return Ok(None);
        };
        {
            let review = &mut store.reviews[index];
            if let Some(text) = update.text {
                review.text = text;
            }
            if let Some(score) = update.score {
                review.score = score;
            }
        }
        let stored = store.reviews[index].clone();
        Ok(Some(Self::build_review(&store, &stored)))
    }

    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let existed = store.reviews.iter().any(|r| r.id == review_id);
        Self::remove_review(&mut store, review_id);
        Ok(existed)
    }

    async fn list_comments(
        &self,
        review_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Comment>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut comments: Vec<Comment> = store
            .comments
            .iter()
            .filter(|c| c.review_id == review_id)
            .map(|c| Self::build_comment(&store, c))
            .collect();
        comments.sort_by(|a, b| a.pub_date.cmp(&b.pub_date).then(a.id.cmp(&b.id)));
        Ok(Self::page(comments, limit, offset))
    }

    async fn get_comment(
        &self,
        review_id: i64,
        comment_id: i64,
    ) -> Result<Option<Comment>, ApiError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .comments
            .iter()
            .find(|c| c.id == comment_id && c.review_id == review_id)
            .map(|c| Self::build_comment(&store, c)))
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: String,
    ) -> Result<Comment, ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.reviews.iter().any(|r| r.id == review_id) {
            return Err(ApiError::NotFound("review"));
        }

        store.next_comment_id += 1;
        let stored = StoredComment {
            id: store.next_comment_id,
            review_id,
            author_id,
            text,
            pub_date: Utc::now(),
        };
        let comment = Self::build_comment(&store, &stored);
        store.comments.push(stored);
        Ok(comment)
    }

    async fn update_comment(
        &self,
        comment_id: i64,
        update: CommentUpdate,
    ) -> Result<Option<Comment>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.comments.iter().position(|c| c.id == comment_id) else {
            return Ok(None);
        };
        if let Some(text) = update.text {
            store.comments[index].text = text;
        }
        let stored = store.comments[index].clone();
        Ok(Some(Self::build_comment(&store, &stored)))
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let existed = store.comments.iter().any(|c| c.id == comment_id);
        store.comments.retain(|c| c.id != comment_id);
        Ok(existed)
    }
}
