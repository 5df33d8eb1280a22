use std::net::SocketAddr;

use chrono::Utc;
use oauth2::{
    basic::BasicTokenResponse, AuthorizationCode, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope,
};
use tokio::{io, net};

use super::{server, Client};
use crate::{error, uri};

fn response(status: u16, body: &'static str) -> http::Response<&'static str> {
    http::Response::builder()
        .status(status)
        .header("Date", Utc::now().to_rfc2822())
        .header("Server", "drivemirror")
        .header("Connection", "close")
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(body)
        .expect("Response should be correctly built")
}

impl Client {
    /// Authorization code flow with PKCE.
    /// The browser is redirected to a one-shot server listening on the loopback interface.
    pub(super) async fn fetch_token_pkce(
        &self,
        scopes: Vec<Scope>,
    ) -> treemirror::Result<BasicTokenResponse> {
        log::info!("Starting PKCE flow for scopes {scopes:?}");

        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let listener = net::TcpListener::bind(&addr).await?;
        let redirect_addr = listener.local_addr()?;

        let redirect_url = RedirectUrl::new(format!("http://{redirect_addr}"))
            .map_err(|err| treemirror::Error::Bug(format!("invalid redirect URL: {err}")))?;
        let redirect_url = std::borrow::Cow::Borrowed(&redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_state) = self
            .inner
            .oauth2
            .authorize_url(CsrfToken::new_random)
            .set_redirect_uri(redirect_url.clone())
            .add_scopes(scopes)
            .add_extra_param("access_type", "offline")
            .set_pkce_challenge(pkce_challenge)
            .url();

        log::info!("Opening browser to {auth_url}");
        println!("If your browser does not open, visit this URL to authorize access:\n{auth_url}");
        tokio::task::spawn_blocking(move || webbrowser::open(auth_url.as_str()));

        log::trace!("starting local server on {redirect_addr}");
        let (socket, addr) = listener.accept().await?;

        log::trace!("incoming request from {addr}");
        let (reader, writer) = io::split(socket);
        let reader = io::BufReader::new(reader);
        let writer = io::BufWriter::new(writer);
        let req = server::parse_request(reader).await.map_err(error::auth)?;
        let query = uri::QueryMap::parse(req.uri().query());

        if let Some(err) = query.get("error") {
            server::write_response(response(401, "Authorization was denied."), writer)
                .await
                .map_err(error::io)?;
            treemirror::auth_bail!("Authorization denied: {err}");
        }

        let code = query
            .get("code")
            .map(str::to_string)
            .map(AuthorizationCode::new)
            .ok_or_else(|| {
                treemirror::auth_error!(
                    "'code' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;
        let state = query
            .get("state")
            .map(str::to_string)
            .map(CsrfToken::new)
            .ok_or_else(|| {
                treemirror::auth_error!(
                    "'state' was not returned by {}",
                    self.inner.oauth2.auth_url().as_str()
                )
            })?;

        if state.secret() != csrf_state.secret() {
            log::error!("Failed PKCE challenge");
            server::write_response(response(401, "Could not verify the CSRF token."), writer)
                .await
                .map_err(error::io)?;
            treemirror::auth_bail!("Could not verify the CSRF token");
        }

        log::trace!("exchanging code for token");

        let token_response = self
            .inner
            .oauth2
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .set_redirect_uri(redirect_url)
            .request_async(|req| async move { self.http(req).await })
            .await
            .map_err(error::auth)?;

        server::write_response(
            response(200, "Access granted, you can close this window."),
            writer,
        )
        .await
        .map_err(error::io)?;

        Ok(token_response)
    }
}
