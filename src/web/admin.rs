use std::{collections::HashMap, convert::Infallible};

use serde::{Deserialize, Serialize};
use warp::{
    http::{header, StatusCode},
    reject::{Reject, Rejection},
    reply::Response,
    Filter, Reply,
};

use crate::{
    core::{
        participant::Participant,
        registration::RegistrationRequest,
        storage::{StoredObject, ADMIN_TAG_PREFIX, TAG_BUCKET},
        track::Track,
        voucher::to_csv,
    },
    error::{Error, Result},
    send_message, Directory,
};

use super::handlers::{to_http_error, to_http_output};

/// Most tags listed at once
const TAG_LIST_LIMIT: usize = 500;

/// Rejection for admin routes called without the admin token
#[derive(Debug)]
pub struct AdminRejected;

impl Reject for AdminRejected {}

/// A Json struct to request a voucher batch
#[derive(Serialize, Deserialize, Debug)]
pub struct VoucherBatch {
    pub count: usize,
    pub length: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VoucherCodes {
    pub codes: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Search {
    pub search: Option<String>,
    pub archdeaconry: Option<String>,
}

/// A stored admin tag together with who it belongs to, if known
#[derive(Serialize, Debug)]
pub struct TagListing {
    pub name: String,
    pub public_url: String,
    pub track: Option<Track>,
    pub participant: Option<i64>,
    pub full_name: Option<String>,
    pub archdeaconry: Option<String>,
}

/// Passes requests carrying `Authorization: Bearer <admin_token>`.
///
/// With no token configured every admin request is rejected.
pub fn with_admin(token: Option<String>) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |auth: Option<String>| {
            let token = token.clone();
            async move {
                let presented = auth.as_deref().and_then(|a| a.strip_prefix("Bearer "));
                match (token.as_deref(), presented) {
                    (Some(expected), Some(presented)) if !expected.is_empty() && expected == presented => Ok(()),
                    _ => Err(warp::reject::custom(AdminRejected)),
                }
            }
        })
        .untuple_one()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One row per participant, track specific fields after the common ones.
pub fn participants_csv(track: Track, participants: &[Participant]) -> String {
    let extra: Vec<&str> = track
        .required_fields()
        .iter()
        .copied()
        .filter(|f| !matches!(*f, "archdeaconry" | "church"))
        .collect();

    let mut header = vec![
        "id",
        "full_name",
        "phone",
        "email",
        "archdeaconry",
        "church",
        "payment_status",
    ];
    header.extend(&extra);
    header.extend(["photo_url", "tag_url", "created_at"]);

    let mut out = header.join(",");
    out.push('\n');

    for p in participants {
        let mut row = vec![
            p.id.to_string(),
            p.full_name.clone(),
            p.phone.clone(),
            p.email.clone(),
            p.archdeaconry.clone().unwrap_or_default(),
            p.church.clone().unwrap_or_default(),
            p.status().as_str().to_string(),
        ];
        row.extend(extra.iter().map(|f| p.field(f).unwrap_or_default().to_string()));
        row.extend([
            p.photo_url.clone().unwrap_or_default(),
            p.tag_url.clone().unwrap_or_default(),
            p.created_at.to_string(),
        ]);

        out.push_str(&row.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(","));
        out.push('\n');
    }

    out
}

fn csv_reply(body: String, file_name: &str) -> Response {
    let reply = warp::reply::with_header(body, header::CONTENT_TYPE, "text/csv; charset=utf-8");
    warp::reply::with_header(
        reply,
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", file_name),
    )
    .into_response()
}

pub async fn generate_vouchers(
    batch: VoucherBatch,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let codes = send_message!(
        directory.registration_actor,
        RegistrationRequest,
        GenerateVouchers,
        batch.count,
        batch.length.unwrap_or(8)
    );

    to_http_output(codes.map(|codes| VoucherCodes { codes }))
}

pub async fn list_vouchers(directory: Directory) -> std::result::Result<Response, Infallible> {
    to_http_output(directory.registrar.db().get_vouchers().await)
}

/// Unused codes, ready to print.
pub async fn export_vouchers(directory: Directory) -> std::result::Result<Response, Infallible> {
    match directory.registrar.db().get_vouchers().await {
        Ok(vouchers) => {
            let codes: Vec<String> = vouchers.into_iter().filter(|v| !v.used).map(|v| v.code).collect();
            Ok(csv_reply(to_csv(&codes), "vouchers.csv"))
        }
        Err(e) => Ok(to_http_error(e)),
    }
}

/// `<track>` answers Json, `<track>.csv` a spreadsheet export.
pub async fn list_registrations(
    track: String,
    search: Search,
    directory: Directory,
) -> std::result::Result<Response, Infallible> {
    let (slug, csv) = match track.strip_suffix(".csv") {
        Some(slug) => (slug, true),
        None => (track.as_str(), false),
    };
    let track: Track = match slug.parse() {
        Ok(track) => track,
        Err(e) => {
            log::debug!("{}", e);
            return Ok(to_http_error(Error::NotFound));
        }
    };

    let participants = directory
        .registrar
        .db()
        .list_participants(track, search.search.as_deref())
        .await;

    match (participants, csv) {
        (Ok(participants), true) => Ok(csv_reply(
            participants_csv(track, &participants),
            &format!("{}_registrations.csv", track.slug()),
        )),
        (participants, false) => to_http_output(participants),
        (Err(e), true) => Ok(to_http_error(e)),
    }
}

fn matches_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().replace('_', " ").contains(&needle.to_lowercase())
}

async fn find_tags(search: &Search, directory: &Directory) -> Result<Vec<TagListing>> {
    let objects: Vec<StoredObject> = directory
        .storage
        .list(TAG_BUCKET, ADMIN_TAG_PREFIX, TAG_LIST_LIMIT)
        .await?;

    let mut owners: HashMap<String, (Track, Participant)> = HashMap::new();
    for track in Track::ALL {
        for p in directory.registrar.db().list_participants(track, None).await? {
            if let Some(url) = p.tag_url.clone() {
                owners.insert(url, (track, p));
            }
        }
    }

    let search_text = search.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let arch = search
        .archdeaconry
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    Ok(objects
        .into_iter()
        .filter_map(|object| {
            let name = object.path.rsplit('/').next().unwrap_or_default().to_string();
            let owner = owners.get(&object.public_url);

            let matches_search = search_text.map_or(true, |s| {
                matches_text(&name, s) || owner.is_some_and(|(_, p)| matches_text(&p.full_name, s))
            });
            let matches_arch = arch.map_or(true, |a| match owner {
                Some((_, p)) => p
                    .archdeaconry
                    .as_deref()
                    .is_some_and(|pa| pa.eq_ignore_ascii_case(a)),
                None => matches_text(&name, a),
            });
            if !(matches_search && matches_arch) {
                return None;
            }

            Some(TagListing {
                name,
                public_url: object.public_url.clone(),
                track: owner.map(|(t, _)| *t),
                participant: owner.map(|(_, p)| p.id),
                full_name: owner.map(|(_, p)| p.full_name.clone()),
                archdeaconry: owner.and_then(|(_, p)| p.archdeaconry.clone()),
            })
        })
        .collect())
}

pub async fn list_tags(search: Search, directory: Directory) -> std::result::Result<Response, Infallible> {
    to_http_output(find_tags(&search, &directory).await)
}

pub async fn list_archdeaconries(directory: Directory) -> std::result::Result<Response, Infallible> {
    to_http_output(directory.registrar.db().get_archdeaconries(Track::Youth).await)
}

pub fn unauthorized() -> Response {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": Error::Unauthorized.user_message() })),
        StatusCode::UNAUTHORIZED,
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sqlx::types::Json;

    use super::*;
    use crate::core::participant::PaymentStatus;

    fn participant() -> Participant {
        let mut profile = BTreeMap::new();
        for (k, v) in [
            ("church", "St. Peter's, Aremo"),
            ("archdeaconry", "Agodi"),
            ("position_held", "Youth \"President\""),
            ("position_held_in_arch", "None"),
            ("position_held_in_dio", "None"),
        ] {
            profile.insert(k.to_string(), v.to_string());
        }

        Participant {
            id: 3,
            full_name: "Ven. Ade".to_string(),
            phone: "0803".to_string(),
            email: String::new(),
            identity_key: String::new(),
            profile: Json(profile),
            archdeaconry: Some("Agodi".to_string()),
            church: Some("St. Peter's, Aremo".to_string()),
            photo_url: None,
            payment_status: Some(PaymentStatus::Registered),
            tag_url: None,
            created_at: 1700000000000,
        }
    }

    #[test]
    fn test_participants_csv() {
        let csv = participants_csv(Track::Leadership, &[participant()]);
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            "id,full_name,phone,email,archdeaconry,church,payment_status,position_held,\
             position_held_in_arch,position_held_in_dio,photo_url,tag_url,created_at"
        );
        assert_eq!(
            lines.next().unwrap(),
            "3,Ven. Ade,0803,,Agodi,\"St. Peter's, Aremo\",registered,\"Youth \"\"President\"\"\",\
             None,None,,,1700000000000"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_matches_text() {
        assert!(matches_text("Jane_Doe_1700.png", "jane doe"));
        assert!(!matches_text("Jane_Doe_1700.png", "john"));
    }
}
