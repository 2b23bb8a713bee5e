use std::{borrow::Cow, collections::HashSet, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use crate::models::{
    Category, CategoryWithFeatures, Faq, Feature, Listing, ListingChildren, ListingDetail,
    ListingImage, ListingSummary, Location, LocationOption, NewCategory, NewFaq, NewListing,
    NewListingImage, NewLocation, NewUser, NewWorkingHour, PriceRange, Review, ReviewWithUser,
    User, WorkingHour,
};
use crate::slug::SlugLookup;
use crate::validation::PageRequest;

const LISTING_COLUMNS: &str = r#"
    id, slug, name, description, address, city, zip, latitude, longitude, phone, email,
    website, rating, price_range, price_from, price_to, category_id, location_id,
    created_at, updated_at
"#;

/// Shared filter clause for listing searches. Every parameter is optional.
const LISTING_FILTER: &str = r#"
    FROM listings l
    JOIN categories c ON c.id = l.category_id
    LEFT JOIN locations loc ON loc.id = l.location_id
    WHERE ($1::int4 IS NULL OR l.category_id = $1)
      AND ($2::text IS NULL OR c.slug = $2)
      AND ($3::int4 IS NULL OR l.location_id = $3)
      AND ($4::text IS NULL OR loc.slug = $4)
      AND ($5::text[] IS NULL OR l.price_range::text = ANY($5))
      AND ($6::int4[] IS NULL OR EXISTS (
            SELECT 1 FROM listing_features lf
            WHERE lf.listing_id = l.id AND lf.feature_id = ANY($6)
      ))
      AND ($7::text IS NULL OR l.name ILIKE $7 OR l.description ILIKE $7 OR l.city ILIKE $7)
"#;

/// Failures of multi-table writes that reference other records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("category {0} does not exist")]
    MissingCategory(i32),
    #[error("location {0} does not exist")]
    MissingLocation(i32),
    #[error("one or more feature ids do not exist")]
    MissingFeatures,
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub category_id: Option<i32>,
    pub category_slug: Option<String>,
    pub location_id: Option<i32>,
    pub location_slug: Option<String>,
    pub price_ranges: Option<Vec<PriceRange>>,
    pub feature_ids: Option<Vec<i32>>,
    pub search: Option<String>,
}

pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code() == Some(Cow::Borrowed("23505")) && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code() == Some(Cow::Borrowed("23503")))
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn dedupe_ids(ids: &[i32]) -> Vec<i32> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = match pool_options().connect(database_url).await {
            Ok(pool) => pool,
            Err(sqlx::Error::Database(db_err)) if db_err.code() == Some(Cow::Borrowed("3D000")) => {
                log::info!("Database missing, attempting to create it");
                create_database_if_missing(database_url).await?;
                pool_options().connect(database_url).await?
            }
            Err(err) => return Err(err),
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Database migrations applied");

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========================================================================
    // USERS
    // ========================================================================

    pub async fn create_user(&self, user: NewUser) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password, role)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user.name)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_user_by_id(&self, user_id: i32) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_refresh_token(
        &self,
        user_id: i32,
        refresh_token: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    pub async fn clear_refresh_token(&self, refresh_token: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET refresh_token = NULL, updated_at = NOW() WHERE refresh_token = $1",
        )
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_reset_token(
        &self,
        user_id: i32,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_token = $2, reset_token_expiry = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Swaps the password when `token` is known and unexpired. Returns whether a user matched.
    pub async fn reset_password(&self, token: &str, password_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password = $2,
                reset_token = NULL,
                reset_token_expiry = NULL,
                refresh_token = NULL,
                updated_at = NOW()
            WHERE reset_token = $1 AND reset_token_expiry > NOW()
            "#,
        )
        .bind(token)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn reset_token_valid(&self, token: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE reset_token = $1 AND reset_token_expiry > NOW())",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
    }

    // ========================================================================
    // FEATURES
    // ========================================================================

    pub async fn list_features(&self) -> Result<Vec<Feature>, sqlx::Error> {
        sqlx::query_as::<_, Feature>("SELECT * FROM features ORDER BY name, id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_feature(&self, feature_id: i32) -> Result<Option<Feature>, sqlx::Error> {
        sqlx::query_as::<_, Feature>("SELECT * FROM features WHERE id = $1")
            .bind(feature_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create_feature(&self, name: &str) -> Result<Feature, sqlx::Error> {
        sqlx::query_as::<_, Feature>("INSERT INTO features (name) VALUES ($1) RETURNING *")
            .bind(name)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn update_feature(&self, feature_id: i32, name: &str) -> Result<Feature, sqlx::Error> {
        sqlx::query_as::<_, Feature>(
            "UPDATE features SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(feature_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete_feature(&self, feature_id: i32) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM features WHERE id = $1")
            .bind(feature_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Fails with [`StoreError::MissingFeatures`] unless every id exists.
    async fn ensure_features_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        feature_ids: &[i32],
    ) -> Result<Vec<i32>, StoreError> {
        let ids = dedupe_ids(feature_ids);
        if ids.is_empty() {
            return Ok(ids);
        }

        let found = {
            let conn = tx.as_mut();
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM features WHERE id = ANY($1)")
                .bind(&ids)
                .fetch_one(conn)
                .await?
        };

        if found != ids.len() as i64 {
            return Err(StoreError::MissingFeatures);
        }
        Ok(ids)
    }

    // ========================================================================
    // CATEGORIES
    // ========================================================================

    pub async fn list_categories(
        &self,
        page: PageRequest,
    ) -> Result<(Vec<Category>, i64), sqlx::Error> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT * FROM categories ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;

        Ok((categories, total))
    }

    pub async fn get_category(&self, category_id: i32) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_category_with_features(
        &self,
        category_id: i32,
    ) -> Result<Option<CategoryWithFeatures>, sqlx::Error> {
        let Some(category) = self.get_category(category_id).await? else {
            return Ok(None);
        };
        let features = self.category_features(category_id).await?;
        Ok(Some(CategoryWithFeatures { category, features }))
    }

    pub async fn category_features(&self, category_id: i32) -> Result<Vec<Feature>, sqlx::Error> {
        sqlx::query_as::<_, Feature>(
            r#"
            SELECT f.*
            FROM features f
            JOIN category_features cf ON cf.feature_id = f.id
            WHERE cf.category_id = $1
            ORDER BY f.name, f.id
            "#,
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn create_category(
        &self,
        category: NewCategory,
    ) -> Result<CategoryWithFeatures, StoreError> {
        let mut tx = self.pool.begin().await?;

        let record = {
            let conn = tx.as_mut();
            sqlx::query_as::<_, Category>(
                r#"
                INSERT INTO categories (name, slug, description, banner_image, icon)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(&category.name)
            .bind(&category.slug)
            .bind(&category.description)
            .bind(&category.banner_image)
            .bind(&category.icon)
            .fetch_one(conn)
            .await?
        };

        Self::replace_category_features_with_tx(&mut tx, record.id, &category.feature_ids).await?;
        tx.commit().await?;

        let features = self.category_features(record.id).await?;
        Ok(CategoryWithFeatures {
            category: record,
            features,
        })
    }

    pub async fn update_category(
        &self,
        category: Category,
        feature_ids: Option<Vec<i32>>,
    ) -> Result<CategoryWithFeatures, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = {
            let conn = tx.as_mut();
            sqlx::query_as::<_, Category>(
                r#"
                UPDATE categories
                SET name = $2,
                    slug = $3,
                    description = $4,
                    banner_image = $5,
                    icon = $6,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(category.id)
            .bind(&category.name)
            .bind(&category.slug)
            .bind(&category.description)
            .bind(&category.banner_image)
            .bind(&category.icon)
            .fetch_one(conn)
            .await?
        };

        if let Some(feature_ids) = feature_ids {
            Self::replace_category_features_with_tx(&mut tx, updated.id, &feature_ids).await?;
        }
        tx.commit().await?;

        let features = self.category_features(updated.id).await?;
        Ok(CategoryWithFeatures {
            category: updated,
            features,
        })
    }

    pub async fn delete_category(&self, category_id: i32) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(category_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    async fn replace_category_features_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        category_id: i32,
        feature_ids: &[i32],
    ) -> Result<(), StoreError> {
        let ids = Self::ensure_features_with_tx(tx, feature_ids).await?;

        {
            let conn = tx.as_mut();
            sqlx::query("DELETE FROM category_features WHERE category_id = $1")
                .bind(category_id)
                .execute(conn)
                .await?;
        }

        for feature_id in ids {
            let conn = tx.as_mut();
            sqlx::query(
                r#"
                INSERT INTO category_features (category_id, feature_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(category_id)
            .bind(feature_id)
            .execute(conn)
            .await?;
        }

        Ok(())
    }

    // ========================================================================
    // LOCATIONS
    // ========================================================================

    pub async fn list_locations(
        &self,
        page: PageRequest,
    ) -> Result<(Vec<Location>, i64), sqlx::Error> {
        let locations = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM locations")
            .fetch_one(&self.pool)
            .await?;

        Ok((locations, total))
    }

    pub async fn location_options(&self) -> Result<Vec<LocationOption>, sqlx::Error> {
        sqlx::query_as::<_, LocationOption>("SELECT id, name, slug FROM locations ORDER BY name, id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_location(&self, location_id: i32) -> Result<Option<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = $1")
            .bind(location_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_location_by_slug(&self, slug: &str) -> Result<Option<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create_location(&self, location: NewLocation) -> Result<Location, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (name, slug, description, parent_id, featured_image)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(location.name)
        .bind(location.slug)
        .bind(location.description)
        .bind(location.parent_id)
        .bind(location.featured_image)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn update_location(&self, location: Location) -> Result<Location, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            r#"
            UPDATE locations
            SET name = $2,
                slug = $3,
                description = $4,
                parent_id = $5,
                featured_image = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(location.id)
        .bind(location.name)
        .bind(location.slug)
        .bind(location.description)
        .bind(location.parent_id)
        .bind(location.featured_image)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete_location(&self, location_id: i32) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM locations WHERE id = $1")
            .bind(location_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    // ========================================================================
    // LISTINGS
    // ========================================================================

    pub async fn search_listings(
        &self,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> Result<(Vec<ListingSummary>, i64), sqlx::Error> {
        let price_ranges: Option<Vec<String>> = filter
            .price_ranges
            .as_ref()
            .map(|ranges| ranges.iter().map(|r| r.as_str().to_string()).collect());
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let select = format!(
            r#"
            SELECT l.*,
                   c.name AS category_name,
                   (
                       SELECT i.url FROM listing_images i
                       WHERE i.listing_id = l.id
                       ORDER BY i.is_main DESC, i.sort_order, i.id
                       LIMIT 1
                   ) AS main_image
            {LISTING_FILTER}
            ORDER BY l.created_at DESC, l.id DESC
            LIMIT $8 OFFSET $9
            "#
        );
        let listings = sqlx::query_as::<_, ListingSummary>(&select)
            .bind(filter.category_id)
            .bind(filter.category_slug.as_deref())
            .bind(filter.location_id)
            .bind(filter.location_slug.as_deref())
            .bind(price_ranges.as_deref())
            .bind(filter.feature_ids.as_deref())
            .bind(search.as_deref())
            .bind(page.limit)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let count = format!("SELECT COUNT(*) {LISTING_FILTER}");
        let total = sqlx::query_scalar::<_, i64>(&count)
            .bind(filter.category_id)
            .bind(filter.category_slug.as_deref())
            .bind(filter.location_id)
            .bind(filter.location_slug.as_deref())
            .bind(price_ranges.as_deref())
            .bind(filter.feature_ids.as_deref())
            .bind(search.as_deref())
            .fetch_one(&self.pool)
            .await?;

        Ok((listings, total))
    }

    pub async fn get_listing(&self, listing_id: i32) -> Result<Option<Listing>, sqlx::Error> {
        sqlx::query_as::<_, Listing>(&format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1"))
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn listing_exists(&self, listing_id: i32) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM listings WHERE id = $1)")
            .bind(listing_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_listing_detail(
        &self,
        listing_id: i32,
    ) -> Result<Option<ListingDetail>, sqlx::Error> {
        match self.get_listing(listing_id).await? {
            Some(listing) => self.load_listing_detail(listing).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_listing_detail_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<ListingDetail>, sqlx::Error> {
        let listing = sqlx::query_as::<_, Listing>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        match listing {
            Some(listing) => self.load_listing_detail(listing).await.map(Some),
            None => Ok(None),
        }
    }

    async fn load_listing_detail(&self, listing: Listing) -> Result<ListingDetail, sqlx::Error> {
        let category = self
            .get_category(listing.category_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        let location = match listing.location_id {
            Some(location_id) => self.get_location(location_id).await?,
            None => None,
        };

        let images = sqlx::query_as::<_, ListingImage>(
            r#"
            SELECT * FROM listing_images
            WHERE listing_id = $1
            ORDER BY sort_order, id
            "#,
        )
        .bind(listing.id)
        .fetch_all(&self.pool)
        .await?;

        let working_hours = sqlx::query_as::<_, WorkingHour>(
            r#"
            SELECT id, listing_id, day, is_24_hour, opening_time, closing_time
            FROM working_hours
            WHERE listing_id = $1
            ORDER BY day
            "#,
        )
        .bind(listing.id)
        .fetch_all(&self.pool)
        .await?;

        let features = sqlx::query_as::<_, Feature>(
            r#"
            SELECT f.*
            FROM features f
            JOIN listing_features lf ON lf.feature_id = f.id
            WHERE lf.listing_id = $1
            ORDER BY f.name, f.id
            "#,
        )
        .bind(listing.id)
        .fetch_all(&self.pool)
        .await?;

        let faqs = sqlx::query_as::<_, Faq>("SELECT * FROM faqs WHERE listing_id = $1 ORDER BY id")
            .bind(listing.id)
            .fetch_all(&self.pool)
            .await?;

        Ok(ListingDetail {
            listing,
            category,
            location,
            images,
            working_hours,
            features,
            faqs,
        })
    }

    /// Inserts a listing and all of its children atomically.
    pub async fn create_listing(&self, listing: NewListing) -> Result<Listing, StoreError> {
        let mut tx = self.pool.begin().await?;

        Self::lock_category_with_tx(&mut tx, listing.category_id).await?;
        if let Some(location_id) = listing.location_id {
            Self::ensure_location_with_tx(&mut tx, location_id).await?;
        }

        let record = {
            let conn = tx.as_mut();
            sqlx::query_as::<_, Listing>(&format!(
                r#"
                INSERT INTO listings (
                    slug, name, description, address, city, zip, latitude, longitude,
                    phone, email, website, rating, price_range, price_from, price_to,
                    category_id, location_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                RETURNING {LISTING_COLUMNS}
                "#
            ))
            .bind(&listing.slug)
            .bind(&listing.name)
            .bind(&listing.description)
            .bind(&listing.address)
            .bind(&listing.city)
            .bind(&listing.zip)
            .bind(listing.latitude)
            .bind(listing.longitude)
            .bind(&listing.phone)
            .bind(&listing.email)
            .bind(&listing.website)
            .bind(listing.rating)
            .bind(listing.price_range)
            .bind(listing.price_from)
            .bind(listing.price_to)
            .bind(listing.category_id)
            .bind(listing.location_id)
            .fetch_one(conn)
            .await?
        };

        Self::insert_working_hours_with_tx(&mut tx, record.id, &listing.working_hours).await?;
        Self::insert_faqs_with_tx(&mut tx, record.id, &listing.faqs).await?;
        Self::replace_listing_features_with_tx(&mut tx, record.id, &listing.feature_ids).await?;
        for image in &listing.images {
            Self::insert_image_with_tx(&mut tx, record.id, image, image.sort_order).await?;
        }

        tx.commit().await?;

        Ok(record)
    }

    /// Writes the merged scalars of `listing`; supplied child sets replace the stored ones.
    pub async fn update_listing(
        &self,
        listing: Listing,
        children: ListingChildren,
    ) -> Result<Listing, StoreError> {
        let mut tx = self.pool.begin().await?;

        Self::lock_category_with_tx(&mut tx, listing.category_id).await?;
        if let Some(location_id) = listing.location_id {
            Self::ensure_location_with_tx(&mut tx, location_id).await?;
        }

        let updated = {
            let conn = tx.as_mut();
            sqlx::query_as::<_, Listing>(&format!(
                r#"
                UPDATE listings
                SET slug = $2,
                    name = $3,
                    description = $4,
                    address = $5,
                    city = $6,
                    zip = $7,
                    latitude = $8,
                    longitude = $9,
                    phone = $10,
                    email = $11,
                    website = $12,
                    rating = $13,
                    price_range = $14,
                    price_from = $15,
                    price_to = $16,
                    category_id = $17,
                    location_id = $18,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {LISTING_COLUMNS}
                "#
            ))
            .bind(listing.id)
            .bind(&listing.slug)
            .bind(&listing.name)
            .bind(&listing.description)
            .bind(&listing.address)
            .bind(&listing.city)
            .bind(&listing.zip)
            .bind(listing.latitude)
            .bind(listing.longitude)
            .bind(&listing.phone)
            .bind(&listing.email)
            .bind(&listing.website)
            .bind(listing.rating)
            .bind(listing.price_range)
            .bind(listing.price_from)
            .bind(listing.price_to)
            .bind(listing.category_id)
            .bind(listing.location_id)
            .fetch_one(conn)
            .await?
        };

        if let Some(hours) = &children.working_hours {
            {
                let conn = tx.as_mut();
                sqlx::query("DELETE FROM working_hours WHERE listing_id = $1")
                    .bind(updated.id)
                    .execute(conn)
                    .await?;
            }
            Self::insert_working_hours_with_tx(&mut tx, updated.id, hours).await?;
        }

        if let Some(faqs) = &children.faqs {
            {
                let conn = tx.as_mut();
                sqlx::query("DELETE FROM faqs WHERE listing_id = $1")
                    .bind(updated.id)
                    .execute(conn)
                    .await?;
            }
            Self::insert_faqs_with_tx(&mut tx, updated.id, faqs).await?;
        }

        if let Some(feature_ids) = &children.feature_ids {
            Self::replace_listing_features_with_tx(&mut tx, updated.id, feature_ids).await?;
        }

        if !children.new_images.is_empty() {
            let mut next_order = {
                let conn = tx.as_mut();
                sqlx::query_scalar::<_, i32>(
                    "SELECT COALESCE(MAX(sort_order), 0) FROM listing_images WHERE listing_id = $1",
                )
                .bind(updated.id)
                .fetch_one(conn)
                .await?
            };

            for image in &children.new_images {
                let sort_order = if image.is_main {
                    let conn = tx.as_mut();
                    sqlx::query("UPDATE listing_images SET is_main = FALSE WHERE listing_id = $1")
                        .bind(updated.id)
                        .execute(conn)
                        .await?;
                    0
                } else {
                    next_order += 1;
                    next_order
                };
                Self::insert_image_with_tx(&mut tx, updated.id, image, sort_order).await?;
            }
        }

        tx.commit().await?;

        Ok(updated)
    }

    pub async fn delete_listing(&self, listing_id: i32) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(listing_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Holds a share lock on the category so it cannot be deleted before commit.
    async fn lock_category_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        category_id: i32,
    ) -> Result<(), StoreError> {
        let conn = tx.as_mut();
        let found = sqlx::query_scalar::<_, i32>("SELECT id FROM categories WHERE id = $1 FOR SHARE")
            .bind(category_id)
            .fetch_optional(conn)
            .await?;

        found.map(|_| ()).ok_or(StoreError::MissingCategory(category_id))
    }

    async fn ensure_location_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        location_id: i32,
    ) -> Result<(), StoreError> {
        let conn = tx.as_mut();
        let found = sqlx::query_scalar::<_, i32>("SELECT id FROM locations WHERE id = $1 FOR SHARE")
            .bind(location_id)
            .fetch_optional(conn)
            .await?;

        found.map(|_| ()).ok_or(StoreError::MissingLocation(location_id))
    }

    async fn insert_working_hours_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        listing_id: i32,
        hours: &[NewWorkingHour],
    ) -> Result<(), sqlx::Error> {
        for hour in hours {
            let conn = tx.as_mut();
            sqlx::query(
                r#"
                INSERT INTO working_hours (listing_id, day, is_24_hour, opening_time, closing_time)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(listing_id)
            .bind(hour.day)
            .bind(hour.is_24_hour)
            .bind(hour.opening_time)
            .bind(hour.closing_time)
            .execute(conn)
            .await?;
        }
        Ok(())
    }

    async fn insert_faqs_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        listing_id: i32,
        faqs: &[NewFaq],
    ) -> Result<(), sqlx::Error> {
        for faq in faqs {
            let conn = tx.as_mut();
            sqlx::query("INSERT INTO faqs (listing_id, question, answer) VALUES ($1, $2, $3)")
                .bind(listing_id)
                .bind(&faq.question)
                .bind(&faq.answer)
                .execute(conn)
                .await?;
        }
        Ok(())
    }

    async fn replace_listing_features_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        listing_id: i32,
        feature_ids: &[i32],
    ) -> Result<(), StoreError> {
        let ids = Self::ensure_features_with_tx(tx, feature_ids).await?;

        {
            let conn = tx.as_mut();
            sqlx::query("DELETE FROM listing_features WHERE listing_id = $1")
                .bind(listing_id)
                .execute(conn)
                .await?;
        }

        for feature_id in ids {
            let conn = tx.as_mut();
            sqlx::query(
                r#"
                INSERT INTO listing_features (listing_id, feature_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(listing_id)
            .bind(feature_id)
            .execute(conn)
            .await?;
        }

        Ok(())
    }

    async fn insert_image_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        listing_id: i32,
        image: &NewListingImage,
        sort_order: i32,
    ) -> Result<(), sqlx::Error> {
        let conn = tx.as_mut();
        sqlx::query(
            r#"
            INSERT INTO listing_images (listing_id, url, alt, is_main, sort_order)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(listing_id)
        .bind(&image.url)
        .bind(&image.alt)
        .bind(image.is_main)
        .bind(sort_order)
        .execute(conn)
        .await?;
        Ok(())
    }

    // ========================================================================
    // REVIEWS
    // ========================================================================

    pub async fn has_reviewed(&self, listing_id: i32, user_id: i32) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reviews WHERE listing_id = $1 AND user_id = $2)",
        )
        .bind(listing_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn create_review(
        &self,
        listing_id: i32,
        user_id: i32,
        rating: i32,
        content: &str,
    ) -> Result<Review, sqlx::Error> {
        sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (listing_id, user_id, rating, content)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(listing_id)
        .bind(user_id)
        .bind(rating)
        .bind(content)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_reviews(
        &self,
        listing_id: i32,
        page: PageRequest,
    ) -> Result<(Vec<ReviewWithUser>, i64), sqlx::Error> {
        let reviews = sqlx::query_as::<_, ReviewWithUser>(
            r#"
            SELECT r.*, u.name AS user_name
            FROM reviews r
            JOIN users u ON u.id = r.user_id
            WHERE r.listing_id = $1
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(listing_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((reviews, total))
    }
}

#[async_trait]
impl SlugLookup for Database {
    async fn slug_taken(&self, slug: &str, exclude_id: Option<i32>) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM listings
                WHERE slug = $1 AND ($2::int4 IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(slug)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(600)))
        .test_before_acquire(true)
}

/// Creates the database named in `database_url` unless it already exists.
/// Returns whether it had to be created.
pub async fn create_database_if_missing(database_url: &str) -> Result<bool, sqlx::Error> {
    if Postgres::database_exists(database_url).await? {
        log::debug!("Database for {} already present", redacted(database_url));
        return Ok(false);
    }

    match Postgres::create_database(database_url).await {
        Ok(()) => {
            log::info!("Created database for {}", redacted(database_url));
            Ok(true)
        }
        // Another process created it between the check and the create.
        Err(sqlx::Error::Database(db_err)) if db_err.code() == Some(Cow::Borrowed("42P04")) => {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Host and database part of a connection URL, without credentials.
fn redacted(database_url: &str) -> &str {
    database_url
        .rsplit_once('@')
        .map_or(database_url, |(_, rest)| rest)
}
