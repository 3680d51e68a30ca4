// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mapping between request URLs and bus subjects.
//!
//! `httpn://host/p1/p2` with method `M` routes to `host.p1.p2.M`. The subject
//! is a routing hint only: dots inside path segments and anything else that
//! does not survive the dot-join round-trips through the reserved URL headers
//! instead.

use http::Method;
use url::Url;

use crate::{Error, URL_SCHEME};

/// HTTP verbs recognized on the wire. Comparison is by exact match; subjects
/// carry the method in canonical uppercase.
const METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// Subject for an outbound request: host, then the non-empty path segments,
/// then the method, all dot-joined.
pub(crate) fn request_subject(method: &Method, url: &Url) -> Result<String, Error> {
    if url.scheme() != URL_SCHEME {
        return Err(Error::InvalidScheme);
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(Error::InvalidRequest("request url has no host"))?;

    let mut subject = String::from(host);
    for segment in url.path().split('/').filter(|s| !s.is_empty()) {
        subject.push('.');
        subject.push_str(segment);
    }
    subject.push('.');
    subject.push_str(method.as_str());
    Ok(subject)
}

/// Inverse mapping on the server: strip the configured prefix and read the
/// method from the final subject segment.
pub(crate) fn parse_method(prefix: &str, subject: &str) -> Result<Method, Error> {
    let rest = subject
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .ok_or(Error::InvalidRequest(
            "subject outside the configured hierarchy",
        ))?;

    let verb = rest.rsplit('.').next().unwrap_or(rest);
    if !METHODS.contains(&verb) {
        return Err(Error::InvalidMethod(verb.to_string()));
    }
    Method::from_bytes(verb.as_bytes()).map_err(|_| Error::InvalidMethod(verb.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn joins_host_path_and_method() {
        let subject =
            request_subject(&Method::GET, &url("httpn://foo.bar/hello/world")).unwrap();
        assert_eq!(subject, "foo.bar.hello.world.GET");
    }

    #[test]
    fn root_path_yields_host_and_method() {
        let subject = request_subject(&Method::POST, &url("httpn://foo.bar/")).unwrap();
        assert_eq!(subject, "foo.bar.POST");

        let subject = request_subject(&Method::POST, &url("httpn://foo.bar")).unwrap();
        assert_eq!(subject, "foo.bar.POST");
    }

    #[test]
    fn empty_segments_are_skipped() {
        let subject = request_subject(&Method::GET, &url("httpn://foo.bar//a//b/")).unwrap();
        assert_eq!(subject, "foo.bar.a.b.GET");
    }

    #[test]
    fn rejects_foreign_schemes() {
        let err = request_subject(&Method::GET, &url("http://foo.bar/hello")).unwrap_err();
        assert!(matches!(err, Error::InvalidScheme));
    }

    #[test]
    fn parses_method_from_final_segment() {
        let method = parse_method("foo.bar", "foo.bar.hello.world.GET").unwrap();
        assert_eq!(method, Method::GET);

        let method = parse_method("foo.bar", "foo.bar.DELETE").unwrap();
        assert_eq!(method, Method::DELETE);
    }

    #[test]
    fn rejects_unknown_and_lowercase_verbs() {
        assert!(matches!(
            parse_method("foo.bar", "foo.bar.hello.FETCH"),
            Err(Error::InvalidMethod(_))
        ));
        assert!(matches!(
            parse_method("foo.bar", "foo.bar.hello.get"),
            Err(Error::InvalidMethod(_))
        ));
    }

    #[test]
    fn rejects_subjects_outside_the_prefix() {
        assert!(matches!(
            parse_method("foo.bar", "other.subject.GET"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_method("foo.bar", "foo.bar"),
            Err(Error::InvalidRequest(_))
        ));
    }
}
