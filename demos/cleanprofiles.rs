use chrono::{Duration, Utc};
use mixpanel::{Client, ExportClient, ProfileQuery};

pub fn main() {
    env_logger::init();

    let secret = std::env::var("MIXPANEL_API_SECRET").unwrap();
    let token = std::env::var("MIXPANEL_TOKEN").unwrap();

    // Find profiles that have been inactive for 90 days. Only the name is
    // needed for the report, so skip the other properties.
    let query = ProfileQuery {
        last_seen_before: Some(Utc::now() - Duration::days(90)),
        output_properties: Some(vec!["$name".to_owned()]),
        ..Default::default()
    };
    let profiles = ExportClient::new(secret).list_profiles(&query).unwrap();

    let client = Client::new(token);
    for profile in &profiles {
        println!(
            "deleting {} ({:?})",
            profile.id,
            profile.properties.get("$name")
        );
        if let Err(err) = client.delete_profile(&profile.id) {
            eprintln!("failed to delete {}: {}", profile.id, err);
            std::process::exit(1);
        }
    }
    println!("deleted {} profiles", profiles.len());
}
