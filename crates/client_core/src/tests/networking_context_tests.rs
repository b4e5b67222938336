use super::*;

fn context() -> NetworkingContext {
    NetworkingContext::new(&SessionSettings::default())
}

#[test]
fn primary_domain_follows_preferred_domain() {
    let mut context = context();
    assert_eq!(context.primary_domain(), "jivosite.com");

    context.set_preferred_domain(NetworkingDomain::Zone(ZoneId::Ru));
    assert_eq!(context.primary_domain(), "jivo.ru");

    context.set_preferred_domain(NetworkingDomain::Sandbox("qa7".into()));
    assert_eq!(context.primary_domain(), "qa7.dev.jivosite.com");

    context.set_preferred_domain(NetworkingDomain::Custom("chat.corp.local".into()));
    assert_eq!(context.primary_domain(), "chat.corp.local");
}

#[test]
fn forced_host_overrides_everything() {
    let settings = SessionSettings {
        forced_host: Some("stand.local".into()),
        ..SessionSettings::default()
    };
    let mut context = NetworkingContext::new(&settings);
    context.set_preferred_domain(NetworkingDomain::Zone(ZoneId::Ru));
    assert_eq!(context.primary_domain(), "stand.local");
}

#[test]
fn preferred_servers_map_to_domains() {
    assert_eq!(NetworkingDomain::from(PreferredServer::Auto), NetworkingDomain::Auto);
    assert_eq!(
        NetworkingDomain::from(PreferredServer::Europe),
        NetworkingDomain::Zone(ZoneId::Com)
    );
    assert_eq!(
        NetworkingDomain::from(PreferredServer::Russia),
        NetworkingDomain::Zone(ZoneId::Ru)
    );
    assert_eq!(
        NetworkingDomain::from(PreferredServer::Asia),
        NetworkingDomain::Zone(ZoneId::Com)
    );
}

#[test]
fn base_url_with_and_without_dev_prefix() {
    assert_eq!(
        context().base_url("api").expect("url").as_str(),
        "https://api.jivosite.com/"
    );

    let settings = SessionSettings {
        dev_server_prefix: Some("beta".into()),
        ..SessionSettings::default()
    };
    assert_eq!(
        NetworkingContext::new(&settings)
            .base_url("api")
            .expect("url")
            .as_str(),
        "https://api.beta.dev.jivosite.com/"
    );
}

#[test]
fn chat_server_scope_needs_learned_endpoint() {
    let builder = EndpointUrlBuilder;
    assert_eq!(
        builder
            .build(None, Some("node7.jivosite.com:443"), &UrlScope::ChatServer, "/client/42/acme/device")
            .expect("url")
            .as_str(),
        "https://node7.jivosite.com/client/42/acme/device"
    );
    assert!(builder
        .build(None, None, &UrlScope::ChatServer, "/client")
        .is_none());
}

#[test]
fn specific_scope_replaces_leading_label() {
    let builder = EndpointUrlBuilder;
    let scope = UrlScope::Specific("telemetry".into());
    assert_eq!(
        builder
            .build(None, Some("node7.jivosite.com:8443"), &scope, "events")
            .expect("url")
            .as_str(),
        "https://telemetry.jivosite.com/events"
    );

    let base = Url::parse("https://sdk.jivo.ru").expect("url");
    assert_eq!(
        builder
            .build(Some(&base), None, &scope, "/events")
            .expect("url")
            .as_str(),
        "https://telemetry.jivo.ru/events"
    );

    assert!(builder
        .build(None, Some("localhost"), &scope, "/events")
        .is_none());
}
