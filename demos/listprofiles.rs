use chrono::{Duration, Utc};
use mixpanel::{ExportClient, ProfileQuery};

pub fn main() {
    env_logger::init();

    let secret = std::env::var("MIXPANEL_API_SECRET").unwrap();
    let client = ExportClient::new(secret);

    // List every profile seen within the last hour.
    let query = ProfileQuery {
        last_seen_after: Some(Utc::now() - Duration::hours(1)),
        ..Default::default()
    };
    let profiles = client.list_profiles(&query).unwrap();

    for profile in &profiles {
        println!("{}: {:?}", profile.id, profile.properties);
    }
    println!("{} profiles", profiles.len());
}
