use std::{collections::BTreeMap, path::Path};

use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{Sqlite, SqlitePoolOptions},
    types::Json,
    SqlitePool,
};

use crate::{
    error::{Error, Result},
    util::unix_millis,
};

use super::{
    donation::{Donation, DonationStatus},
    participant::{Identity, Participant, PaymentStatus},
    track::Track,
    voucher::Voucher,
};

/// A participant that has not been written yet
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub identity: Identity,
    pub profile: BTreeMap<String, String>,
    pub photo_url: Option<String>,
    pub payment_status: PaymentStatus,
}

pub struct RegistryDb {
    db: SqlitePool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

impl RegistryDb {
    /// Opens (creating if needed) the database file and its schema.
    pub async fn init(file: &Path) -> Result<Self> {
        let path = file
            .to_str()
            .ok_or_else(|| Error::Config(format!("Invalid database path {:?}", file)))?;
        let url = format!("sqlite://{}", path);

        if !Sqlite::database_exists(&url).await? {
            log::info!("Creating database {}", path);
            Sqlite::create_database(&url).await?;
        }

        let db = SqlitePool::connect(&url).await?;
        let registry = RegistryDb { db };
        registry.create_schema().await?;
        Ok(registry)
    }

    /// A private database that lives as long as the returned handle.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let registry = RegistryDb { db };
        registry.create_schema().await?;
        Ok(registry)
    }

    async fn create_schema(&self) -> Result<()> {
        for track in Track::ALL {
            sqlx::query(&format!(
                "create table if not exists {}(
                        id integer primary key autoincrement,
                        full_name text not null,
                        phone text not null,
                        email text not null,
                        identity_key text not null unique,
                        profile text not null,
                        archdeaconry text,
                        church text,
                        photo_url text,
                        payment_status text,
                        tag_url text,
                        created_at integer not null
                    );",
                track.table()
            ))
            .execute(&self.db)
            .await?;
        }

        sqlx::query(
            "create table if not exists vouchers(
                    id integer primary key autoincrement,
                    code text not null unique,
                    used boolean not null default 0,
                    used_by integer,
                    used_by_track text,
                    used_at integer
                );",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "create table if not exists donations(
                    id integer primary key autoincrement,
                    tx_ref text not null unique,
                    full_name text not null,
                    email text not null,
                    amount integer not null,
                    currency text not null,
                    status text not null,
                    transaction_id text,
                    created_at integer not null
                );",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn find_participant(
        &self,
        track: Track,
        identity: &Identity,
    ) -> Result<Option<Participant>> {
        log::debug!("Searching {} for {}", track.table(), identity.full_name);
        Ok(sqlx::query_as(&format!(
            "select * from {} where identity_key = ? limit 1",
            track.table()
        ))
        .bind(identity.key())
        .fetch_optional(&self.db)
        .await?)
    }

    pub async fn get_participant(&self, track: Track, id: i64) -> Result<Option<Participant>> {
        Ok(sqlx::query_as(&format!(
            "select * from {} where id = ? limit 1",
            track.table()
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?)
    }

    /// Inserts a participant, returning `None` if one with the same identity already exists.
    pub async fn insert_participant(
        &self,
        track: Track,
        participant: &NewParticipant,
    ) -> Result<Option<i64>> {
        log::debug!(
            "Creating {} participant {}",
            track,
            participant.identity.full_name
        );
        let res = sqlx::query(&format!(
            "insert into {}(
                    full_name, phone, email, identity_key, profile,
                    archdeaconry, church, photo_url, payment_status, created_at
                ) values(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            track.table()
        ))
        .bind(&participant.identity.full_name)
        .bind(&participant.identity.phone)
        .bind(&participant.identity.email)
        .bind(participant.identity.key())
        .bind(Json(&participant.profile))
        .bind(participant.profile.get("archdeaconry"))
        .bind(participant.profile.get("church"))
        .bind(&participant.photo_url)
        .bind(participant.payment_status)
        .bind(unix_millis())
        .execute(&self.db)
        .await;

        match res {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves a participant to `paid`. Returns false if it was already paid.
    pub async fn mark_paid(&self, track: Track, id: i64) -> Result<bool> {
        let res = sqlx::query(&format!(
            "update {} set payment_status = 'paid'
                    where id = ? and (payment_status is null or payment_status != 'paid')",
            track.table()
        ))
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn set_tag_url(&self, track: Track, id: i64, url: &str) -> Result<()> {
        let res = sqlx::query(&format!("update {} set tag_url = ? where id = ?", track.table()))
            .bind(url)
            .bind(id)
            .execute(&self.db)
            .await?;

        if res.rows_affected() == 0 {
            Err(Error::NotFound)
        } else {
            Ok(())
        }
    }

    /// Newest first, optionally filtered by a case-insensitive search over
    /// name, archdeaconry and church.
    pub async fn list_participants(
        &self,
        track: Track,
        search: Option<&str>,
    ) -> Result<Vec<Participant>> {
        match search.map(|s| s.trim()).filter(|s| !s.is_empty()) {
            Some(search) => {
                let pattern = format!("%{}%", search.to_lowercase());
                Ok(sqlx::query_as(&format!(
                    "select * from {}
                        where lower(full_name) like ?1
                            or lower(coalesce(archdeaconry, '')) like ?1
                            or lower(coalesce(church, '')) like ?1
                        order by id desc",
                    track.table()
                ))
                .bind(pattern)
                .fetch_all(&self.db)
                .await?)
            }
            None => Ok(sqlx::query_as(&format!(
                "select * from {} order by id desc",
                track.table()
            ))
            .fetch_all(&self.db)
            .await?),
        }
    }

    pub async fn get_archdeaconries(&self, track: Track) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar(&format!(
            "select distinct archdeaconry from {}
                where archdeaconry is not null and archdeaconry != ''
                order by archdeaconry",
            track.table()
        ))
        .fetch_all(&self.db)
        .await?)
    }

    /// Inserts the codes that are not taken yet and returns those.
    pub async fn add_vouchers(&self, codes: &[String]) -> Result<Vec<String>> {
        let mut tx = self.db.begin().await?;
        let mut added = Vec::with_capacity(codes.len());
        for code in codes {
            let res = sqlx::query("insert or ignore into vouchers(code, used) values(?, 0)")
                .bind(code)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 1 {
                added.push(code.clone());
            }
        }
        tx.commit().await?;

        log::info!("Added {} vouchers", added.len());
        Ok(added)
    }

    pub async fn get_voucher(&self, code: &str) -> Result<Option<Voucher>> {
        Ok(sqlx::query_as("select * from vouchers where code = ? limit 1")
            .bind(code)
            .fetch_optional(&self.db)
            .await?)
    }

    pub async fn get_vouchers(&self) -> Result<Vec<Voucher>> {
        Ok(sqlx::query_as("select * from vouchers order by id")
            .fetch_all(&self.db)
            .await?)
    }

    /// Consumes a voucher for a participant and marks the participant paid.
    ///
    /// Both writes happen in one transaction. The voucher write is a
    /// compare-and-set on `used = 0`, so a code can only ever be consumed once.
    pub async fn redeem_voucher(&self, track: Track, code: &str, participant: i64) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let status: Option<Option<PaymentStatus>> = sqlx::query_scalar(&format!(
            "select payment_status from {} where id = ?",
            track.table()
        ))
        .bind(participant)
        .fetch_optional(&mut *tx)
        .await?;

        match status {
            None => return Err(Error::NotFound),
            Some(Some(PaymentStatus::Paid)) => return Err(Error::AlreadyPaid),
            Some(_) => {}
        }

        let consumed = sqlx::query(
            "update vouchers set used = 1, used_by = ?, used_by_track = ?, used_at = ?
                    where code = ? and used = 0",
        )
        .bind(participant)
        .bind(track.table())
        .bind(unix_millis())
        .bind(code)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(Error::VoucherInvalid);
        }

        let paid = sqlx::query(&format!(
            "update {} set payment_status = 'paid'
                    where id = ? and (payment_status is null or payment_status != 'paid')",
            track.table()
        ))
        .bind(participant)
        .execute(&mut *tx)
        .await?;

        if paid.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(Error::AlreadyPaid);
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn add_donation(&self, donation: &Donation) -> Result<i64> {
        let res = sqlx::query(
            "insert into donations(tx_ref, full_name, email, amount, currency, status, created_at)
                    values(?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&donation.tx_ref)
        .bind(&donation.full_name)
        .bind(&donation.email)
        .bind(donation.amount)
        .bind(&donation.currency)
        .bind(donation.status)
        .bind(donation.created_at)
        .execute(&self.db)
        .await?;

        Ok(res.last_insert_rowid())
    }

    pub async fn get_donation(&self, tx_ref: &str) -> Result<Option<Donation>> {
        Ok(sqlx::query_as("select * from donations where tx_ref = ? limit 1")
            .bind(tx_ref)
            .fetch_optional(&self.db)
            .await?)
    }

    /// Settles a pending donation. Settled donations are left alone.
    pub async fn settle_donation(
        &self,
        tx_ref: &str,
        status: DonationStatus,
        transaction_id: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            "update donations set status = ?, transaction_id = ?
                    where tx_ref = ? and status = 'pending'",
        )
        .bind(status)
        .bind(transaction_id)
        .bind(tx_ref)
        .execute(&self.db)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn new_participant(name: &str, phone: &str, email: &str) -> NewParticipant {
        let mut profile = BTreeMap::new();
        profile.insert("archdeaconry".to_string(), "Agodi".to_string());
        profile.insert("church".to_string(), "St. Peter's".to_string());

        NewParticipant {
            identity: Identity::new(name, phone, email),
            profile,
            photo_url: None,
            payment_status: PaymentStatus::NotPaid,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = RegistryDb::in_memory().await.unwrap();
        let jane = new_participant("Jane Doe", "08012345678", "JANE@X.COM");

        let id = db.insert_participant(Track::Youth, &jane).await.unwrap().unwrap();
        let found = db
            .find_participant(Track::Youth, &Identity::new(" Jane Doe ", "08012345678", "jane@x.com"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.id, id);
        assert_eq!(found.email, "jane@x.com");
        assert_eq!(found.status(), PaymentStatus::NotPaid);
        assert_eq!(found.archdeaconry.as_deref(), Some("Agodi"));
        assert_eq!(found.field("church"), Some("St. Peter's"));

        // Tracks do not share records
        assert!(db
            .find_participant(Track::Ignition, &jane.identity)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let db = RegistryDb::in_memory().await.unwrap();
        let jane = new_participant("Jane Doe", "08012345678", "jane@x.com");
        let shouting = new_participant(" Jane Doe", "08012345678 ", "JANE@X.COM");

        assert!(db.insert_participant(Track::Youth, &jane).await.unwrap().is_some());
        assert!(db.insert_participant(Track::Youth, &shouting).await.unwrap().is_none());
        assert_eq!(db.list_participants(Track::Youth, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_moves_forward_once() {
        let db = RegistryDb::in_memory().await.unwrap();
        let id = db
            .insert_participant(Track::Youth, &new_participant("A", "1", "a@x.com"))
            .await
            .unwrap()
            .unwrap();

        assert!(db.mark_paid(Track::Youth, id).await.unwrap());
        assert!(!db.mark_paid(Track::Youth, id).await.unwrap());
        assert_eq!(
            db.get_participant(Track::Youth, id).await.unwrap().unwrap().status(),
            PaymentStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_redeem_voucher_once() {
        let db = RegistryDb::in_memory().await.unwrap();
        let first = db
            .insert_participant(Track::Youth, &new_participant("A", "1", "a@x.com"))
            .await
            .unwrap()
            .unwrap();
        let second = db
            .insert_participant(Track::Youth, &new_participant("B", "2", "b@x.com"))
            .await
            .unwrap()
            .unwrap();
        db.add_vouchers(&["AB12CD34".to_string()]).await.unwrap();

        db.redeem_voucher(Track::Youth, "AB12CD34", first).await.unwrap();

        let voucher = db.get_voucher("AB12CD34").await.unwrap().unwrap();
        assert!(voucher.used);
        assert_eq!(voucher.used_by, Some(first));
        assert_eq!(voucher.used_by_track.as_deref(), Some("registrations"));

        assert!(matches!(
            db.redeem_voucher(Track::Youth, "AB12CD34", second).await,
            Err(Error::VoucherInvalid)
        ));
        assert_eq!(
            db.get_participant(Track::Youth, second).await.unwrap().unwrap().status(),
            PaymentStatus::NotPaid
        );
        assert_eq!(
            db.get_voucher("AB12CD34").await.unwrap().unwrap().used_by,
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_redeem_for_paid_record_keeps_voucher() {
        let db = RegistryDb::in_memory().await.unwrap();
        let id = db
            .insert_participant(Track::Youth, &new_participant("A", "1", "a@x.com"))
            .await
            .unwrap()
            .unwrap();
        db.mark_paid(Track::Youth, id).await.unwrap();
        db.add_vouchers(&["ZZZZ2222".to_string()]).await.unwrap();

        assert!(matches!(
            db.redeem_voucher(Track::Youth, "ZZZZ2222", id).await,
            Err(Error::AlreadyPaid)
        ));
        assert!(matches!(
            db.redeem_voucher(Track::Youth, "ZZZZ2222", 999).await,
            Err(Error::NotFound)
        ));
        assert!(!db.get_voucher("ZZZZ2222").await.unwrap().unwrap().used);
    }

    #[tokio::test]
    async fn test_add_vouchers_skips_taken_codes() {
        let db = RegistryDb::in_memory().await.unwrap();

        let first = db
            .add_vouchers(&["AAAA".to_string(), "BBBB".to_string()])
            .await
            .unwrap();
        let second = db
            .add_vouchers(&["BBBB".to_string(), "CCCC".to_string()])
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second, vec!["CCCC".to_string()]);
        assert_eq!(db.get_vouchers().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_search_and_archdeaconries() {
        let db = RegistryDb::in_memory().await.unwrap();
        db.insert_participant(Track::Youth, &new_participant("Jane Doe", "1", "j@x.com"))
            .await
            .unwrap();
        let mut other = new_participant("John Roe", "2", "r@x.com");
        other.profile.insert("archdeaconry".to_string(), "Yemetu".to_string());
        db.insert_participant(Track::Youth, &other).await.unwrap();

        let all = db.list_participants(Track::Youth, None).await.unwrap();
        assert_eq!(all[0].full_name, "John Roe");

        let found = db.list_participants(Track::Youth, Some("yemetu")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].full_name, "John Roe");

        let found = db.list_participants(Track::Youth, Some("PETER")).await.unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(
            db.get_archdeaconries(Track::Youth).await.unwrap(),
            vec!["Agodi".to_string(), "Yemetu".to_string()]
        );
    }

    #[tokio::test]
    async fn test_donation_settles_once() {
        let db = RegistryDb::in_memory().await.unwrap();
        let donation = Donation {
            id: 0,
            tx_ref: "DON-1-1234".to_string(),
            full_name: "Jane".to_string(),
            email: "jane@x.com".to_string(),
            amount: 1000,
            currency: "NGN".to_string(),
            status: DonationStatus::Pending,
            transaction_id: None,
            created_at: 1,
        };
        db.add_donation(&donation).await.unwrap();

        assert!(db
            .settle_donation("DON-1-1234", DonationStatus::Successful, "55")
            .await
            .unwrap());
        assert!(!db
            .settle_donation("DON-1-1234", DonationStatus::Failed, "56")
            .await
            .unwrap());

        let stored = db.get_donation("DON-1-1234").await.unwrap().unwrap();
        assert_eq!(stored.status, DonationStatus::Successful);
        assert_eq!(stored.transaction_id.as_deref(), Some("55"));
    }
}
