use std::{
    ffi::CStr,
    mem,
    net::{IpAddr, ToSocketAddrs},
    ptr,
};

use url::Host;

use crate::error::ScanError;

const LOOPBACK_NAME: &str = "localhost";
const NAME_BUFFER_SZ: usize = 1025;

pub fn lookup(target: &str) -> Result<IpAddr, ScanError> {
    // Bare IPv6 literals aren't valid URL hosts.
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let ip = match Host::parse(target).map_err(ScanError::HostParseFailed)? {
        Host::Domain(dmn) => {
            let ip = (dmn.as_str(), 0 /* dummy port */)
                .to_socket_addrs()
                .map_err(ScanError::ResolverFailed)?
                .map(|saddr| saddr.ip())
                .next()
                .ok_or_else(|| ScanError::DomainLookupFailed(target.into()))?;

            log::debug!("Found address `{}` mapped by target `{}`", ip, target);

            ip
        }
        Host::Ipv4(ip) => IpAddr::V4(ip),
        Host::Ipv6(ip) => IpAddr::V6(ip),
    };

    Ok(ip)
}

/// Asks the system resolver for the name registered to `ip`.
pub fn reverse(ip: IpAddr) -> Result<String, ScanError> {
    // SAFETY: sockaddr_storage is plain old data; zeroed is a valid value.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

    let len = match ip {
        IpAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large and aligned enough for any sockaddr.
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        IpAddr::V6(v6) => {
            // SAFETY: same as above.
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr.s6_addr = v6.octets();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };

    let mut host = [0 as libc::c_char; NAME_BUFFER_SZ];

    // SAFETY: every pointer references a live buffer with the announced length.
    let code = unsafe {
        libc::getnameinfo(
            &storage as *const _ as *const libc::sockaddr,
            len as libc::socklen_t,
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };

    if code != 0 {
        // SAFETY: gai_strerror returns a static nul terminated string.
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(code)) };
        return Err(ScanError::ReverseLookupFailed(
            ip,
            reason.to_string_lossy().into_owned(),
        ));
    }

    // SAFETY: getnameinfo nul terminates on success.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };

    Ok(name.to_string_lossy().into_owned())
}

/// Name printed next to the address. Never fails: lookup errors fall back
/// to the address literal.
pub fn display_name(ip: IpAddr) -> String {
    if ip.is_loopback() {
        return LOOPBACK_NAME.into();
    }

    match reverse(ip) {
        Ok(name) => {
            log::debug!("Address `{}` reverse resolves to `{}`", ip, name);
            name
        }
        Err(e) => {
            log::warn!("{}", e);
            ip.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn ip_literals_skip_the_resolver() {
        assert_eq!(
            lookup("8.8.8.8").unwrap(),
            IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
        );
        assert_eq!(lookup("[::1]").unwrap(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn garbage_target_is_rejected() {
        assert!(matches!(
            lookup("exa mple"),
            Err(ScanError::HostParseFailed(_))
        ));
    }

    #[test]
    fn loopback_is_localhost() {
        assert_eq!(display_name(IpAddr::V4(Ipv4Addr::LOCALHOST)), "localhost");
        assert_eq!(display_name(IpAddr::V6(Ipv6Addr::LOCALHOST)), "localhost");
    }

    #[test]
    fn unnamed_address_falls_back_to_literal() {
        // TEST-NET-3 has no PTR records.
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 77));
        assert_eq!(display_name(ip), "203.0.113.77");
    }
}
